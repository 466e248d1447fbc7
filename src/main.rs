use anyhow::Result;
use coordinator::{Node, NodeConfig, Outcome, ShardConverter};
use log::{error, info, warn};
use serde_json::Value;
use tokio::{
    io::{self, AsyncBufReadExt, BufReader},
    signal,
};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = NodeConfig::load()?;
    info!(
        advance_on_update = config.advance_on_update;
        "storing artifacts under {}", config.artifacts_dir.display()
    );

    let mut node = Node::from_config(&config);
    let mut lines = BufReader::new(io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => dispatch(&mut node, &config, &line),
                None => {
                    info!("input closed, shutting down");
                    break;
                }
            },
            _ = signal::ctrl_c() => {
                info!("received SIGINT");
                break;
            }
        }
    }

    Ok(())
}

/// Handles one newline-delimited JSON message. Failures are logged and only
/// reject that message.
fn dispatch(node: &mut Node<ShardConverter>, config: &NodeConfig, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let raw: Value = match serde_json::from_str(line) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("dropping unparsable input: {e}");
            return;
        }
    };

    let outcome = match node.handle_raw(&raw) {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("rejected message: {e}");
            return;
        }
    };

    match outcome {
        Outcome::Registered(role) => info!("registered {role} node"),
        Outcome::SessionStarted {
            session_id,
            serving_dir,
        } => info!("session {session_id} serving {}", serving_dir.display()),
        Outcome::WeightsAccepted { session_id, round } => {
            info!(round = round; "accepted weights for session {session_id}");

            if config.advance_on_update {
                match node.advance_round() {
                    Ok(dir) => info!("published {}", dir.display()),
                    Err(e) => error!("failed to advance session {session_id}: {e}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_lines_are_dropped() {
        let root = tempfile::tempdir().unwrap();
        let config = NodeConfig {
            artifacts_dir: root.path().to_path_buf(),
            advance_on_update: true,
        };
        let mut node = Node::from_config(&config);

        for line in [
            "",
            "not json",
            r#"{"type": "HEARTBEAT"}"#,
            r#"{"type": "REGISTER", "node_type": "library"}"#,
            r#"{"type": "NEW_WEIGHTS", "session_id": "s", "round": 0, "action": "TRAIN", "results": {"weights": [1.0], "omega": 1.0}}"#,
        ] {
            dispatch(&mut node, &config, line);
        }

        assert!(node.session().is_none());
    }
}
