use butterfly_policy::Rule;

use super::{format_duration, Services};

pub async fn run(url: &str) -> anyhow::Result<()> {
    let services = Services::open(true)?;

    if services.config.enforcement.is_internal_url(url) {
        println!("{} is internal to the host, never enforced", url);
        return Ok(());
    }

    let loaded = services.policies.hydrate().await;
    let classification = services
        .policies
        .classify(url, services.quota.as_ref())
        .await;
    let host = &classification.host;
    let decision = classification.decision;

    if !loaded {
        println!("{}: {} (no policy loaded)", host, decision);
        return Ok(());
    }
    if decision.is_denied() {
        println!("{}: {} (navigation would be redirected)", host, decision);
    } else {
        println!("{}: {}", host, decision);
    }
    if classification.rule == Rule::Rationed {
        let left = services
            .quota
            .remaining_today(host, classification.quota_seconds)
            .await;
        println!(
            "  used {} of {}, {} left",
            format_duration(classification.used_seconds),
            format_duration(classification.quota_seconds),
            format_duration(left)
        );
    }
    Ok(())
}
