//! `streamloader info` – probe a resource for its content information.

use anyhow::{bail, Context, Result};
use streamloader_core::config::LoaderConfig;
use streamloader_core::loader::LoaderRuntime;
use streamloader_core::request::{channel, ChannelRequest, ContentInfo, LoadOutcome};

use super::marked_url;

pub async fn run_info(cfg: &LoaderConfig, url: &str, json: bool) -> Result<()> {
    let url = marked_url(url, &cfg.scheme_prefix);
    let runtime = LoaderRuntime::with_config(cfg)?;
    let (request, mut rx) = ChannelRequest::content_info(url.clone());
    if !runtime.handle().should_load(request) {
        bail!("loader declined {}", url);
    }
    let got = channel::collect(&mut rx).await;
    runtime.shutdown()?;

    match got.outcome {
        Some(LoadOutcome::Complete) => {}
        Some(LoadOutcome::Failed(e)) => return Err(e).with_context(|| format!("probe {}", url)),
        other => bail!("probe of {} did not complete: {:?}", url, other),
    }
    let info = got
        .content_info
        .context("response carried no content information")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        print!("{}", render(&info));
    }
    Ok(())
}

fn render(info: &ContentInfo) -> String {
    let length = info
        .content_length
        .map(|n| n.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:<14} {}\n{:<14} {}\n{:<14} {}\n",
        "TYPE",
        info.content_type,
        "LENGTH",
        length,
        "BYTE RANGES",
        if info.byte_range_access_supported { "yes" } else { "no" }
    )
}
