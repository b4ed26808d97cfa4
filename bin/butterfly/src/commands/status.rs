use super::{format_duration, Services};

pub async fn run() -> anyhow::Result<()> {
    let services = Services::open(true)?;
    let paths = &services.paths;

    println!("butterfly status");
    println!("================");
    println!();

    let config_path = paths.config_file();
    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_path.exists() { "✓" } else { "✗ (defaults)" }
    );
    println!("Storage:   {}", paths.storage_dir().display());
    println!("Authority: {}", services.config.authority_base_url());

    let key = services.storage.credentials().load().await?;
    println!(
        "Hash key:  {}",
        if key.is_some() { "✓ configured" } else { "✗ not set" }
    );
    println!();

    match services.storage.policy_cache().load().await? {
        Some(policy) => {
            println!("Cached policy:");
            println!("  blocked:     {}", policy.blocked_patterns.len());
            println!("  rationed:    {}", policy.rationed_patterns.len());
            println!("  recommended: {}", policy.recommended_sites.len());
            println!("  daily limit: {}", format_duration(policy.daily_quota_seconds));
        }
        None => println!("Cached policy: none (all navigation allowed)"),
    }
    println!();

    let report = services.quota.usage_report(None).await;
    if report.is_empty() {
        println!("Usage today: none");
    } else {
        println!("Usage today:");
        for (domain, seconds) in report {
            println!("  {:<30} {}", domain, format_duration(seconds));
        }
    }

    if key.is_none() {
        println!();
        println!("Run `butterfly key set <KEY>` to enable policy refresh.");
    }

    Ok(())
}
