use butterfly_scheduler::{PolicyRefreshService, RefreshReason};

use super::{format_duration, Services};

pub async fn run() -> anyhow::Result<()> {
    let services = Services::open(false)?;
    let service =
        PolicyRefreshService::new(services.policies.clone(), services.storage.credentials());

    println!("Fetching policy from {} ...", services.config.authority_base_url());
    let Some(policy) = service.refresh_now(RefreshReason::Manual).await? else {
        anyhow::bail!("No hash key set. Run `butterfly key set <KEY>` first.");
    };

    println!("✓ Policy updated");
    if policy.is_empty() {
        println!("  no sites are blocked or time-limited");
    }
    println!("  blocked:     {}", policy.blocked_patterns.join(", "));
    println!("  rationed:    {}", policy.rationed_patterns.join(", "));
    println!("  daily limit: {}", format_duration(policy.daily_quota_seconds));

    let recommended = services.policies.recommended_sites();
    if !recommended.is_empty() {
        println!("  recommended:");
        for (name, url) in &recommended {
            println!("    {:<20} {}", name, url);
        }
    }
    Ok(())
}
