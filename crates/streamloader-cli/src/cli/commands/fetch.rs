//! `streamloader fetch` – stream one byte range through the loader.

use anyhow::{bail, Context, Result};
use std::path::Path;
use streamloader_core::config::LoaderConfig;
use streamloader_core::loader::LoaderRuntime;
use streamloader_core::request::{ChannelRequest, DataRange, LoadOutcome, RequestEvent};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::marked_url;

pub async fn run_fetch(
    cfg: &LoaderConfig,
    url: &str,
    offset: u64,
    length: Option<u64>,
    output: Option<&Path>,
) -> Result<()> {
    let range = match length {
        Some(len) => DataRange::new(offset, len),
        None => DataRange::to_end(offset),
    };
    let url = marked_url(url, &cfg.scheme_prefix);

    let mut sink: Box<dyn AsyncWrite + Unpin + Send> = match output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("create {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    let runtime = LoaderRuntime::with_config(cfg)?;
    let handle = runtime.handle();
    let (request, mut rx) = ChannelRequest::data(url.clone(), range);
    if !handle.should_load(request.clone()) {
        bail!("loader declined {} (empty range or not an http(s) resource)", url);
    }

    let mut outcome = None;
    while let Some(event) = rx.recv().await {
        match event {
            RequestEvent::Data(chunk) => {
                if let Err(e) = sink.write_all(&chunk).await {
                    handle.cancel(request.clone());
                    runtime.shutdown()?;
                    return Err(e).context("write output");
                }
            }
            RequestEvent::ContentInfo(_) => {}
            RequestEvent::Finished(done) => {
                outcome = Some(done);
                break;
            }
        }
    }
    sink.flush().await?;
    runtime.shutdown()?;

    match outcome {
        Some(LoadOutcome::Complete) => {
            tracing::info!(url = %url, bytes = request.bytes_received(), "fetch complete");
            eprintln!("{} bytes", request.bytes_received());
            Ok(())
        }
        Some(LoadOutcome::Cancelled) => bail!("request for {} was cancelled", url),
        Some(LoadOutcome::Failed(e)) => Err(e).with_context(|| format!("fetch {}", url)),
        None => bail!("loader stopped before {} finished", url),
    }
}
