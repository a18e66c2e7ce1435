use std::path::Path;

use anyhow::Context;
use can_format::{CanFormat, FormatCodec, FormatRegistry};
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use crate::hub::Hub;

/// Feed a recorded capture back through the hub as if it had just been
/// received. Frames for buses the hub does not know are skipped. Returns
/// the number of frames injected.
pub async fn replay<R>(hub: &Hub, reader: R, format: Box<dyn CanFormat>) -> anyhow::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut messages = FramedRead::new(reader, FormatCodec::new(format));
    let mut injected = 0;
    let mut skipped = 0;

    while let Some(message) = messages.next().await {
        let message = message?;
        let frame = match message.entry.frame() {
            Some(frame) => frame.clone(),
            None => continue,
        };
        let known = frame
            .origin
            .as_ref()
            .map_or(false, |origin| hub.find_bus(origin.as_str()).is_some());
        if known {
            hub.incoming_frame(frame);
            injected += 1;
        } else {
            skipped += 1;
        }
    }

    if skipped > 0 {
        log::debug!("Replay skipped {} frames for unknown buses", skipped);
    }
    Ok(injected)
}

pub async fn replay_file(
    hub: &Hub,
    path: &Path,
    format: &str,
    formats: &FormatRegistry,
) -> anyhow::Result<usize> {
    let format = formats.create(format)?;
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Could not open capture {}", path.display()))?;
    let injected = replay(hub, file, format).await?;
    log::info!("Replayed {} frames from {}", injected, path.display());
    Ok(injected)
}
