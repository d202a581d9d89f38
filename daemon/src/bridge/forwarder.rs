//! Serial line → trigger frame forwarding

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::serial::{LineCodec, SerialError};

use super::registry::{ListenerRegistry, PublishReport};

/// One recognized serial line and the frame it is forwarded as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRule {
    /// Exact line content after trimming
    pub line: String,
    /// Frame sent to listeners; defaults to `line`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward: Option<String>,
}

impl TriggerRule {
    pub fn verbatim(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            forward: None,
        }
    }
}

/// The set of lines the bridge reacts to
#[derive(Debug, Clone, Default)]
pub struct TriggerSet {
    frames: HashMap<String, String>,
}

impl TriggerSet {
    pub fn new(rules: &[TriggerRule]) -> Self {
        let frames = rules
            .iter()
            .map(|rule| {
                let line = rule.line.trim().to_string();
                let frame = rule.forward.clone().unwrap_or_else(|| line.clone());
                (line, frame)
            })
            .collect();
        Self { frames }
    }

    /// Frame to forward for an already-trimmed line
    pub fn match_line(&self, line: &str) -> Option<&str> {
        self.frames.get(line).map(String::as_str)
    }
}

/// Reads lines, recognizes triggers, publishes them
pub struct TriggerBridge {
    triggers: TriggerSet,
    registry: Arc<ListenerRegistry>,
}

impl TriggerBridge {
    pub fn new(triggers: TriggerSet, registry: Arc<ListenerRegistry>) -> Self {
        Self { triggers, registry }
    }

    /// Handle one framed line. Returns the publish outcome for a trigger.
    pub fn handle_line(&self, line: &str) -> Option<PublishReport> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let Some(frame) = self.triggers.match_line(line) else {
            debug!(line, "unrecognized serial line");
            return None;
        };

        let report = self.registry.publish(frame);
        info!(
            line,
            frame,
            delivered = report.delivered,
            pruned = report.pruned,
            "trigger forwarded"
        );
        Some(report)
    }

    /// Forward triggers from `reader` until it fails or ends.
    ///
    /// Never returns `Ok`: a serial link that stops producing is an error
    /// the daemon exits on.
    pub async fn run<R>(&self, reader: R) -> Result<(), SerialError>
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = FramedRead::new(reader, LineCodec::new());

        while let Some(line) = lines.next().await {
            self.handle_line(&line?);
        }

        warn!("serial stream ended");
        Err(SerialError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn bridge(rules: &[TriggerRule]) -> (TriggerBridge, Arc<ListenerRegistry>) {
        let registry = Arc::new(ListenerRegistry::default());
        (
            TriggerBridge::new(TriggerSet::new(rules), Arc::clone(&registry)),
            registry,
        )
    }

    #[tokio::test]
    async fn test_line_split_across_reads_yields_one_event() {
        let (bridge, registry) = bridge(&[TriggerRule::verbatim("button_clicked")]);
        let (_, mut rx) = registry.attach();

        let serial = Builder::new().read(b"butt").read(b"on_clicked\n").build();
        let result = bridge.run(serial).await;

        assert!(matches!(result, Err(SerialError::Closed)));
        assert_eq!(rx.try_recv().unwrap(), "button_clicked");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_non_matching_line_publishes_nothing() {
        let (bridge, registry) = bridge(&[TriggerRule::verbatim("button_clicked")]);
        let (_, mut rx) = registry.attach();

        let serial = Builder::new().read(b"noise\n").read(b"\r\n").build();
        let _ = bridge.run(serial).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_read_error_ends_bridge() {
        let (bridge, _registry) = bridge(&[TriggerRule::verbatim("button_clicked")]);
        let serial = Builder::new()
            .read(b"button_")
            .read_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged"))
            .build();

        assert!(matches!(bridge.run(serial).await, Err(SerialError::Read(_))));
    }

    #[test]
    fn test_trimmed_match_with_forward_mapping() {
        let (bridge, registry) = bridge(&[TriggerRule {
            line: "button_pressed".to_string(),
            forward: Some("trigger_voice".to_string()),
        }]);
        let (_, mut rx) = registry.attach();

        let report = bridge.handle_line("  button_pressed \t").unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(rx.try_recv().unwrap(), "trigger_voice");
    }

    #[test]
    fn test_match_is_exact() {
        let (bridge, _registry) = bridge(&[TriggerRule::verbatim("button_clicked")]);
        assert!(bridge.handle_line("button_clicked_twice").is_none());
        assert!(bridge.handle_line("BUTTON_CLICKED").is_none());
        assert!(bridge.handle_line("").is_none());
    }

    #[test]
    fn test_trigger_with_no_listeners_is_still_recognized() {
        let (bridge, _registry) = bridge(&[TriggerRule::verbatim("button_clicked")]);
        assert_eq!(
            bridge.handle_line("button_clicked"),
            Some(PublishReport::default())
        );
    }
}
