use anyhow::Context;
use chrono::NaiveDate;

use super::{format_duration, Services};

pub async fn run(day: Option<String>) -> anyhow::Result<()> {
    if let Some(day) = &day {
        NaiveDate::parse_from_str(day, "%Y-%m-%d")
            .with_context(|| format!("invalid day '{}', expected YYYY-MM-DD", day))?;
    }

    let services = Services::open(true)?;
    let report = services.quota.usage_report(day.as_deref()).await;
    let label = day.as_deref().unwrap_or("today");

    if report.is_empty() {
        println!("No usage recorded for {}.", label);
        return Ok(());
    }

    println!("Usage for {}:", label);
    let mut total = 0;
    for (domain, seconds) in &report {
        println!("  {:<30} {}", domain, format_duration(*seconds));
        total += seconds;
    }
    println!("  {:<30} {}", "total", format_duration(total));
    Ok(())
}
