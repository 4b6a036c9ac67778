//! Crawl control: incremental list loading, cursors and the unit loop.

mod cursor;
mod engine;
mod error;
mod load;
mod report;

pub use cursor::{CrawlCursor, CursorEncoding, CursorParam, CursorPlan, CursorStep, DateSpec};
pub use engine::{run_crawl, CrawlJob, CrawlPolicy, Scope, UnitRows, WorkUnit};
pub use error::{CrawlError, UnitError};
pub use load::{materialize_rows, LoadOptions, LoadProgress, RowQuery};
pub use report::{CrawlReport, UnitReport, UnitState};
