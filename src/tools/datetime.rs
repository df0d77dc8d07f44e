//! `get_today_date` tool

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;

use super::{Tool, ToolArgs, ToolResult, ToolSchema};
use crate::Result;

/// Source of the current instant
pub trait Clock: Send + Sync {
    /// Current UTC time
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a single instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Reports today's date in a configured timezone
///
/// The timezone is fixed at construction; a `timezone` argument from the
/// model is ignored.
pub struct TodayDateTool {
    timezone: Tz,
    clock: Arc<dyn Clock>,
}

impl TodayDateTool {
    /// Name the model calls this tool by
    pub const NAME: &'static str = "get_today_date";

    /// Create the tool for a timezone, using the system clock
    #[must_use]
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Describe the given instant in this tool's timezone
    #[must_use]
    pub fn describe(&self, now: DateTime<Utc>) -> ToolResult {
        let local = now.with_timezone(&self.timezone);
        let text = format!(
            "Today is {}, {} {} {}",
            local.format("%A"),
            local.day(),
            local.format("%B"),
            local.year()
        );

        let mut result = ToolResult::new();
        result.insert("text".to_string(), text.into());
        result.insert("iso".to_string(), local.to_rfc3339().into());
        result.insert("timezone".to_string(), self.timezone.name().into());
        result
    }
}

#[async_trait]
impl Tool for TodayDateTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::without_parameters(
            Self::NAME,
            format!("Get today's date in {} timezone.", self.timezone.name()),
        )
    }

    async fn invoke(&self, args: &ToolArgs) -> Result<ToolResult> {
        if args.contains_key("timezone") {
            tracing::debug!(tool = Self::NAME, "ignoring model-supplied timezone");
        }
        Ok(self.describe(self.clock.now_utc()))
    }
}
