//! Built-in job definitions.

use chrono::NaiveDate;

use super::actions::PageAction;
use super::extract::{FieldRole, FieldSource, FieldSpec, IdSegment, MetricKind};
use super::ranking::{CategoryConfig, RankingJobConfig};
use super::roster::RosterJobConfig;
use super::station::StationJobConfig;
use super::youtube::YoutubeJobConfig;
use super::{CursorConfig, JobDefinition, JobTemplate, KeyMode, PolicyConfig};
use crate::crawl::{CursorEncoding, CursorParam, DateSpec, RowQuery};
use crate::models::Service;
use crate::scrapers::http_client::ANDROID_WEBVIEW_USER_AGENT;
use crate::scrapers::CookieSpec;

const DAILY: &str = "0 0 0 * * *";
const EVERY_THREE_HOURS: &str = "0 0 */3 * * *";

const PLAYBOARD_SIGNIN: &str = "https://playboard.co/en/account/signin";
const VIEWERSHIP_DOMAIN: &str = "viewership.softc.one";

/// Every job the service ships with, in the order `run-all` uses.
pub fn builtin() -> Vec<JobDefinition> {
    vec![
        playboard_broadcast(),
        playboard_super_chatted(),
        playboard_live_viewers(),
        playboard_viewed(),
        poong_today_daily(),
        poong_today_broadcast(),
        viewership(),
        viewership_daily_subscribe(),
        youtube(),
    ]
}

fn playboard_login() -> Vec<PageAction> {
    vec![
        PageAction::Goto {
            url: PLAYBOARD_SIGNIN.to_string(),
        },
        PageAction::Fill {
            selector: "input[name=\"email\"]".to_string(),
            env: "PLAYBOARD_EMAIL".to_string(),
        },
        PageAction::Fill {
            selector: "input[name=\"password\"]".to_string(),
            env: "PLAYBOARD_PASSWORD".to_string(),
        },
        PageAction::click("button[type=\"submit\"]"),
        PageAction::wait(3000),
    ]
}

/// Switch the ranking to KRW and the interface to Korean.
fn playboard_locale_setup() -> Vec<PageAction> {
    vec![
        PageAction::click_optional(".more-btn"),
        PageAction::click_optional(".label--icon-currency"),
        PageAction::wait(2000),
        PageAction::click_optional(".shortcut_language li:nth-of-type(3)"),
        PageAction::click_optional(".menu__language"),
        PageAction::click_optional(".popup li span"),
        PageAction::wait(1000),
    ]
}

/// Category tabs, ranking rows and display fields shared by the chart pages.
fn playboard_chart(
    url: &str,
    categories: usize,
    cursor: CursorConfig,
    target_count: usize,
    metrics: &[(&str, &str)],
    key: KeyMode,
) -> RankingJobConfig {
    let mut fields = vec![
        FieldSpec::attr(
            "td > a",
            "href",
            FieldRole::ChannelId {
                segment: IdSegment::Last,
            },
        ),
        FieldSpec::attr(".lazy-image img", "src", FieldRole::Icon),
        FieldSpec::text(".name > a > h3", FieldRole::Name),
        FieldSpec::new(
            ".name li > a",
            FieldSource::TextAll {
                separator: ",".to_string(),
            },
            FieldRole::Tags,
        ),
    ];
    fields.extend(
        metrics
            .iter()
            .map(|(selector, name)| FieldSpec::metric(selector, name, MetricKind::Integer)),
    );

    RankingJobConfig {
        service: Service::PlayboardCo,
        url: url.to_string(),
        login: playboard_login(),
        setup: Vec::new(),
        categories: Some(CategoryConfig {
            selector: ".shelf > div:first-of-type li:not(:first-child)".to_string(),
            label_selector: Some("span".to_string()),
            limit: Some(categories),
        }),
        cursor,
        cursor_param: None,
        list_selector: ".sheet".to_string(),
        rows: RowQuery::new(".sheet .chart__row").excluding(".ad__slot"),
        count_rows: None,
        load_trigger: None,
        target_count,
        max_load_attempts: 50,
        fields,
        key,
        row_date: DateSpec::Today,
        settle_ms: 0,
        challenge_wait_secs: None,
        wait_secs: 20,
        user_agent: None,
        cookies: Vec::new(),
    }
}

fn playboard_broadcast() -> JobDefinition {
    let config = playboard_chart(
        "https://playboard.co/youtube-ranking/most-subscribed-all-channels-in-south-korea-total",
        200,
        CursorConfig::Once,
        200,
        &[
            (".score", "cumulativeSubscribers"),
            (".score > span", "dailyNewSubscribers"),
        ],
        KeyMode::Latest,
    );
    JobDefinition {
        id: "playboard-broadcast".to_string(),
        service: Service::PlayboardCo,
        schedule: DAILY.to_string(),
        enabled: true,
        description: "Most-subscribed channels, latest totals per category".to_string(),
        policy: PolicyConfig::pacing_secs(20),
        resume: false,
        template: JobTemplate::Ranking(config),
    }
}

fn backfill_day(day: u32) -> DateSpec {
    DateSpec::Fixed(NaiveDate::from_ymd_opt(2025, 3, day).unwrap_or(NaiveDate::MIN))
}

fn playboard_super_chatted() -> JobDefinition {
    let mut config = playboard_chart(
        "https://playboard.co/en/youtube-ranking/most-superchatted-all-channels-in-south-korea-daily",
        100,
        CursorConfig::Dates {
            initial: backfill_day(1),
            target: backfill_day(21),
        },
        100,
        &[
            (".score > span:nth-of-type(1)", "cumulativeSuperChat"),
            (".score:nth-of-type(odd) > span", "dailySuperChat"),
        ],
        KeyMode::Daily,
    );
    config.setup = playboard_locale_setup();
    config.cursor_param = Some(CursorParam {
        name: "period".to_string(),
        encoding: CursorEncoding::UnixSeconds { offset: 43_200 },
    });
    config.settle_ms = 5000;
    config.challenge_wait_secs = Some(30);

    JobDefinition {
        id: "playboard-super-chatted".to_string(),
        service: Service::PlayboardCo,
        schedule: DAILY.to_string(),
        enabled: true,
        description: "Daily super chat totals, backfilled over a date range".to_string(),
        policy: PolicyConfig::pacing_secs(120),
        resume: true,
        template: JobTemplate::Ranking(config),
    }
}

fn playboard_live_viewers() -> JobDefinition {
    let config = playboard_chart(
        "https://playboard.co/en/youtube-ranking/most-watched-all-channels-in-south-korea-daily",
        100,
        CursorConfig::Dates {
            initial: DateSpec::Yesterday,
            target: DateSpec::Yesterday,
        },
        100,
        &[(".score", "dailyLiveViewers")],
        KeyMode::Daily,
    );
    JobDefinition {
        id: "playboard-live-viewers".to_string(),
        service: Service::PlayboardCo,
        schedule: DAILY.to_string(),
        enabled: true,
        description: "Most-watched live channels of the previous day".to_string(),
        policy: PolicyConfig::pacing_secs(1),
        resume: false,
        template: JobTemplate::Ranking(config),
    }
}

fn playboard_viewed() -> JobDefinition {
    let config = playboard_chart(
        "https://playboard.co/en/youtube-ranking/most-viewed-all-channels-in-south-korea-daily",
        99,
        CursorConfig::Dates {
            initial: DateSpec::Yesterday,
            target: DateSpec::Yesterday,
        },
        99,
        &[(".score", "dailyViews")],
        KeyMode::Daily,
    );
    JobDefinition {
        id: "playboard-viewed".to_string(),
        service: Service::PlayboardCo,
        schedule: DAILY.to_string(),
        enabled: true,
        description: "Most-viewed channels of the previous day".to_string(),
        policy: PolicyConfig::default(),
        resume: false,
        template: JobTemplate::Ranking(config),
    }
}

fn poong_today_daily() -> JobDefinition {
    let col = |n: usize, name: &str| {
        FieldSpec::metric(
            &format!(".col:nth-of-type({})", n),
            name,
            MetricKind::Integer,
        )
    };
    let config = RankingJobConfig {
        service: Service::PoongToday,
        url: "https://poong.today/rankings/broadcast/history".to_string(),
        login: Vec::new(),
        setup: Vec::new(),
        categories: None,
        cursor: CursorConfig::Dates {
            initial: DateSpec::Today,
            target: DateSpec::Today,
        },
        cursor_param: None,
        list_selector: ".bbs-body".to_string(),
        rows: RowQuery::new(".bbs-body .body .row"),
        count_rows: Some(RowQuery::new(".body .rank")),
        load_trigger: Some(".bbs-btn-more".to_string()),
        target_count: 1000,
        max_load_attempts: 50,
        fields: vec![
            FieldSpec::attr(
                ".post",
                "href",
                FieldRole::ChannelId {
                    segment: IdSegment::Index(4),
                },
            ),
            FieldSpec::attr(".thumnail > img", "src", FieldRole::Icon),
            FieldSpec::text(".nick", FieldRole::Name),
            FieldSpec::text(".category", FieldRole::Category),
            col(1, "dailyReceivedStarBalloons"),
            col(2, "hourlyStarBalloonRate"),
            col(3, "dailyViewerCount"),
            col(4, "dailyStarBalloonGifts"),
        ],
        key: KeyMode::Daily,
        row_date: DateSpec::Today,
        settle_ms: 0,
        challenge_wait_secs: None,
        wait_secs: 20,
        user_agent: None,
        cookies: Vec::new(),
    };
    JobDefinition {
        id: "poong-today-daily".to_string(),
        service: Service::PoongToday,
        schedule: EVERY_THREE_HOURS.to_string(),
        enabled: true,
        description: "Today's star balloon ranking".to_string(),
        policy: PolicyConfig::default(),
        resume: false,
        template: JobTemplate::Ranking(config),
    }
}

fn poong_today_broadcast() -> JobDefinition {
    JobDefinition {
        id: "poong-today-broadcast".to_string(),
        service: Service::PoongToday,
        schedule: DAILY.to_string(),
        enabled: true,
        description: "Station totals for every channel seen on the daily ranking".to_string(),
        policy: PolicyConfig::default(),
        resume: false,
        template: JobTemplate::Station(StationJobConfig::default()),
    }
}

fn viewership_cookies() -> Vec<CookieSpec> {
    vec![
        CookieSpec {
            name: "_vcrcs".to_string(),
            value: String::new(),
            value_env: Some("VIEWERSHIP_VCRCS".to_string()),
            domain: VIEWERSHIP_DOMAIN.to_string(),
            path: "/".to_string(),
        },
        CookieSpec {
            name: "webview".to_string(),
            value: r#"{"platform":"android"}"#.to_string(),
            value_env: None,
            domain: VIEWERSHIP_DOMAIN.to_string(),
            path: "/".to_string(),
        },
    ]
}

fn viewership() -> JobDefinition {
    let stat = |n: usize, name: &str, kind: MetricKind| {
        FieldSpec::metric(
            &format!("div:nth-child({}) > span:nth-child(1)", n),
            name,
            kind,
        )
    };
    let config = RankingJobConfig {
        service: Service::Viewership,
        url: "https://viewership.softc.one/ranking/streamer?type=naverchzzk&date=yesterday"
            .to_string(),
        login: Vec::new(),
        setup: Vec::new(),
        categories: None,
        cursor: CursorConfig::Pages {
            first: 1,
            max_rows: Some(300),
            max_pages: 50,
        },
        cursor_param: Some(CursorParam {
            name: "page".to_string(),
            encoding: CursorEncoding::PageNumber,
        }),
        list_selector: r#"[class~="md:py-2"]"#.to_string(),
        rows: RowQuery::new(r#"[class~="md:py-2"] > div > div > a"#),
        count_rows: None,
        load_trigger: None,
        target_count: 0,
        max_load_attempts: 1,
        fields: vec![
            FieldSpec::attr(
                "",
                "href",
                FieldRole::ChannelId {
                    segment: IdSegment::Index(5),
                },
            ),
            FieldSpec::attr("img", "src", FieldRole::Icon),
            FieldSpec::attr("img", "alt", FieldRole::Name),
            stat(4, "dailyBroadcastCount", MetricKind::Float),
            stat(5, "dailyViewerCount", MetricKind::Integer),
            stat(6, "dailyAverageViewerCount", MetricKind::Integer),
        ],
        key: KeyMode::Daily,
        row_date: DateSpec::Yesterday,
        settle_ms: 0,
        challenge_wait_secs: None,
        wait_secs: 20,
        user_agent: Some(ANDROID_WEBVIEW_USER_AGENT.to_string()),
        cookies: viewership_cookies(),
    };
    JobDefinition {
        id: "viewership".to_string(),
        service: Service::Viewership,
        schedule: EVERY_THREE_HOURS.to_string(),
        enabled: true,
        description: "Yesterday's streamer ranking, page by page".to_string(),
        policy: PolicyConfig::default(),
        resume: false,
        template: JobTemplate::Ranking(config),
    }
}

fn viewership_daily_subscribe() -> JobDefinition {
    let config = RosterJobConfig {
        service: Service::Viewership,
        url_template: "https://viewership.softc.one/channel/naverchzzk/{id}".to_string(),
        selector: ".mt-2.text-3xl.font-bold".to_string(),
        metric: "cumulativeSubscribers".to_string(),
        kind: MetricKind::Integer,
        lookup_attempts: 3,
        lookup_delay_ms: 2000,
        wait_secs: 10,
        user_agent: Some(ANDROID_WEBVIEW_USER_AGENT.to_string()),
        cookies: viewership_cookies(),
    };
    JobDefinition {
        id: "viewership-daily-subscribe".to_string(),
        service: Service::Viewership,
        schedule: DAILY.to_string(),
        enabled: true,
        description: "Subscriber totals for ranked channels that lack one".to_string(),
        policy: PolicyConfig::pacing_secs(1),
        resume: false,
        template: JobTemplate::Roster(config),
    }
}

fn youtube() -> JobDefinition {
    JobDefinition {
        id: "youtube".to_string(),
        service: Service::Youtube,
        schedule: DAILY.to_string(),
        enabled: true,
        description: "Channels behind the top videos of the leading categories".to_string(),
        policy: PolicyConfig::default(),
        resume: false,
        template: JobTemplate::Youtube(YoutubeJobConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique() {
        let jobs = builtin();
        let ids: HashSet<_> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids.len(), jobs.len());
        assert_eq!(jobs.len(), 9);
    }

    #[test]
    fn test_schedules_have_six_fields() {
        for job in builtin() {
            assert_eq!(
                job.schedule.split_whitespace().count(),
                6,
                "{} has a bad schedule",
                job.id
            );
        }
    }

    #[test]
    fn test_ranking_jobs_extract_a_channel_id() {
        for job in builtin() {
            if let JobTemplate::Ranking(cfg) = &job.template {
                let ids = cfg
                    .fields
                    .iter()
                    .filter(|f| matches!(f.role, FieldRole::ChannelId { .. }))
                    .count();
                assert_eq!(ids, 1, "{}", job.id);
            }
        }
    }

    #[test]
    fn test_definitions_survive_toml() {
        for job in builtin() {
            let text = toml::to_string(&job).unwrap();
            let back: JobDefinition = toml::from_str(&text).unwrap();
            assert_eq!(back, job);
        }
    }
}
