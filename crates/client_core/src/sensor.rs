use chrono::Utc;
use shared::protocol::SensorLine;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::types::SensorSample;

/// Line-oriented sensor feed. Each `{"EKG": n, "Pressure": n}` line becomes one
/// [`SensorSample`] stamped at arrival; malformed lines are logged and skipped.
pub struct SensorSource<R> {
    reader: R,
    label: String,
}

impl<R> SensorSource<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(reader: R, label: impl Into<String>) -> Self {
        Self {
            reader,
            label: label.into(),
        }
    }

    /// The stream ends when the reader reaches EOF or fails. Lines that are
    /// not valid UTF-8 are decoded lossily and then dropped as malformed.
    pub fn into_stream(self) -> impl Stream<Item = SensorSample> + Send + Unpin + 'static {
        let parse_label = self.label.clone();
        let raw_lines = futures::stream::unfold(
            (BufReader::new(self.reader), self.label),
            |(mut reader, label)| async move {
                let mut line = Vec::new();
                match reader.read_until(b'\n', &mut line).await {
                    Ok(0) => None,
                    Ok(_) => Some((line, (reader, label))),
                    Err(err) => {
                        warn!(source = %label, %err, "sensor read failed; ending sensor stream");
                        None
                    }
                }
            },
        );
        Box::pin(raw_lines).filter_map(move |line| parse_sample(&parse_label, &line))
    }
}

fn parse_sample(label: &str, raw: &[u8]) -> Option<SensorSample> {
    let decoded = String::from_utf8_lossy(raw);
    let line = decoded.trim();
    if line.is_empty() {
        debug!(source = %label, "skipping blank sensor line");
        return None;
    }
    match SensorLine::parse(line) {
        Ok(parsed) => Some(SensorSample {
            ekg: parsed.ekg,
            pressure: parsed.pressure,
            timestamp: Utc::now(),
        }),
        Err(err) => {
            warn!(source = %label, %err, line, "dropping malformed sensor line");
            None
        }
    }
}

#[cfg(test)]
#[path = "tests/sensor_tests.rs"]
mod tests;
