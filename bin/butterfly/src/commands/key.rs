use butterfly_core::Credential;

use super::Services;

pub async fn set(raw: &str) -> anyhow::Result<()> {
    let credential = Credential::parse(raw)?;
    let services = Services::open(true)?;
    services.storage.credentials().save(&credential).await?;
    println!("✓ Hash key saved");
    println!("Run `butterfly refresh` to fetch the policy for this key.");
    Ok(())
}

pub async fn show() -> anyhow::Result<()> {
    let services = Services::open(true)?;
    match services.storage.credentials().load().await? {
        Some(credential) => println!("{}", credential),
        None => println!("No hash key set."),
    }
    Ok(())
}

pub async fn clear() -> anyhow::Result<()> {
    let services = Services::open(true)?;
    services.storage.credentials().clear().await?;
    services.storage.policy_cache().clear().await?;
    println!("✓ Hash key and cached policy removed");
    Ok(())
}
