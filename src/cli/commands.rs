use anyhow::{Context, Result, bail};

use crate::config::Config;
use crate::remote::RemoteClient;

pub async fn status(config: &Config) -> Result<()> {
    let remote = RemoteClient::new(config)?;

    let title = remote
        .current_title()
        .await
        .with_context(|| format!("Remote service unreachable at {}", config.remote.host))?;

    if title.is_empty() {
        println!("Not playing");
        return Ok(());
    }

    let state = remote.playback_status().await;
    let artists = remote.current_artists().await.unwrap_or_default();

    if artists.is_empty() {
        println!("{state}: {title}");
    } else {
        println!("{state}: {title} by {artists}");
    }

    Ok(())
}

pub async fn check(config: &Config) -> Result<()> {
    let remote = RemoteClient::new(config)?;

    let banner = remote
        .probe()
        .await
        .with_context(|| format!("Remote service unreachable at {}", config.remote.host))?;

    if !banner.contains("Tidal Chrome web API") {
        bail!("Unexpected service at {}: {banner:?}", config.remote.host);
    }

    println!("Remote service is up at {}", config.remote.host);

    match remote.can_play().await {
        Ok(true) => println!("Player is ready."),
        Ok(false) => println!("Player is not ready yet."),
        Err(e) => println!("Player state unavailable: {e}"),
    }

    Ok(())
}
