//! Scripted page interactions (login forms, menu toggles).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::scrapers::{DriverError, PageDriver, WaitPolicy};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PageAction {
    Goto {
        url: String,
    },
    /// Click the first match. Optional clicks are skipped when nothing matches.
    Click {
        selector: String,
        #[serde(default)]
        optional: bool,
    },
    /// Type the value of an environment variable into a field.
    Fill {
        selector: String,
        env: String,
    },
    Wait {
        millis: u64,
    },
    WaitFor {
        selector: String,
        #[serde(default = "default_wait_secs")]
        timeout_secs: u64,
    },
}

fn default_wait_secs() -> u64 {
    20
}

impl PageAction {
    pub fn click(selector: &str) -> Self {
        Self::Click {
            selector: selector.to_string(),
            optional: false,
        }
    }

    pub fn click_optional(selector: &str) -> Self {
        Self::Click {
            selector: selector.to_string(),
            optional: true,
        }
    }

    pub fn wait(millis: u64) -> Self {
        Self::Wait { millis }
    }

    /// Environment variable this action reads, if any.
    pub fn required_env(&self) -> Option<&str> {
        match self {
            Self::Fill { env, .. } => Some(env),
            _ => None,
        }
    }
}

/// Environment variables named by `actions` that are unset or empty.
pub fn missing_env(actions: &[PageAction]) -> Vec<String> {
    actions
        .iter()
        .filter_map(PageAction::required_env)
        .filter(|name| std::env::var(name).map_or(true, |v| v.is_empty()))
        .map(str::to_string)
        .collect()
}

/// Run `actions` in order, stopping at the first failure.
pub async fn run_actions<D: PageDriver + ?Sized>(
    driver: &mut D,
    actions: &[PageAction],
) -> Result<(), DriverError> {
    for action in actions {
        debug!("page action: {:?}", action);
        match action {
            PageAction::Goto { url } => {
                driver.navigate(url, WaitPolicy::NetworkIdle).await?;
            }
            PageAction::Click { selector, optional } => match driver.query_first(selector).await? {
                Some(el) => driver.click(&el).await?,
                None if *optional => debug!("optional click target {} absent", selector),
                None => return Err(DriverError::NotFound(selector.clone())),
            },
            PageAction::Fill { selector, env } => {
                let value = std::env::var(env)
                    .map_err(|_| DriverError::Other(format!("{} is not set", env)))?;
                driver.type_text(selector, &value).await?;
            }
            PageAction::Wait { millis } => {
                tokio::time::sleep(Duration::from_millis(*millis)).await;
            }
            PageAction::WaitFor {
                selector,
                timeout_secs,
            } => {
                driver
                    .wait_for(selector, Duration::from_secs(*timeout_secs))
                    .await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testing::{FakeSite, Node, Page};

    #[tokio::test]
    async fn test_required_click_missing_fails() {
        let mut site = FakeSite::default();
        site.page("https://x.test/", Page::default());
        let actions = vec![
            PageAction::Goto {
                url: "https://x.test/".into(),
            },
            PageAction::click_optional(".cookie-banner"),
            PageAction::click(".menu__language"),
        ];
        let err = run_actions(&mut site, &actions).await.unwrap_err();
        assert!(matches!(err, DriverError::NotFound(s) if s == ".menu__language"));
    }

    #[tokio::test]
    async fn test_clicks_follow_links() {
        let mut site = FakeSite::default();
        let menu = site.add(Node::default().link("https://x.test/ko"));
        site.page("https://x.test/", Page::default().with(".menu", vec![menu]));
        site.page("https://x.test/ko", Page::default());
        let actions = vec![
            PageAction::Goto {
                url: "https://x.test/".into(),
            },
            PageAction::click(".menu"),
        ];
        run_actions(&mut site, &actions).await.unwrap();
        assert_eq!(site.visits, vec!["https://x.test/", "https://x.test/ko"]);
    }

    #[test]
    fn test_missing_env_lists_unset_vars() {
        let actions = vec![PageAction::Fill {
            selector: "input[name=\"email\"]".into(),
            env: "CHANSTATS_TEST_NEVER_SET".into(),
        }];
        assert_eq!(missing_env(&actions), vec!["CHANSTATS_TEST_NEVER_SET"]);
    }
}
