use std::path::PathBuf;

use comms::{Message, NodeRole, SessionStart, WeightsUpdate};
use log::{debug, info, warn};
use serde_json::Value;

use crate::{
    converter::Converter,
    error::{Result, StateErr},
    pipeline::Pipeline,
    session::Session,
};

/// What handling a message produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A peer announced itself.
    Registered(NodeRole),
    /// A new session is serving its initial model.
    SessionStarted {
        session_id: String,
        serving_dir: PathBuf,
    },
    /// An update was recorded for the session's current round.
    WeightsAccepted { session_id: String, round: u64 },
}

/// The coordinator node: dispatches inbound messages to the active session.
///
/// Every mutating call takes `&mut self`, so at most one operation touches
/// the session at a time.
#[derive(Debug)]
pub struct Node<C: Converter> {
    pipeline: Pipeline<C>,
    session: Option<Session>,
}

impl<C: Converter> Node<C> {
    pub fn new(pipeline: Pipeline<C>) -> Self {
        Self {
            pipeline,
            session: None,
        }
    }

    pub fn pipeline(&self) -> &Pipeline<C> {
        &self.pipeline
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Mutable access to the active session, e.g. to hand it an externally
    /// aggregated weight vector.
    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    /// Handles a decoded message.
    ///
    /// # Args
    /// * `msg` - The inbound message.
    ///
    /// # Returns
    /// What the message produced.
    ///
    /// # Errors
    /// Whatever the targeted operation fails with. A failed `NEW_SESSION`
    /// keeps the previous session active.
    pub fn handle(&mut self, msg: Message) -> Result<Outcome> {
        debug!("handling {msg}");

        match msg {
            Message::Registration(reg) => {
                info!("{} node registered", reg.node_role);
                Ok(Outcome::Registered(reg.node_role))
            }
            Message::SessionStart(start) => self.start_session(&start),
            Message::WeightsUpdate(update) => self.accept_update(&update),
        }
    }

    /// Decodes a raw inbound mapping and handles it.
    pub fn handle_raw(&mut self, raw: &Value) -> Result<Outcome> {
        let msg = Message::decode(raw)?;
        self.handle(msg)
    }

    /// Publishes the next round of the active session.
    ///
    /// # Returns
    /// The new round's serving directory.
    ///
    /// # Errors
    /// `StateErr::NoSession` without an active session, otherwise whatever
    /// `Pipeline::advance_round` fails with.
    pub fn advance_round(&mut self) -> Result<PathBuf> {
        let session = self.session.as_mut().ok_or(StateErr::NoSession)?;
        self.pipeline.advance_round(session)
    }

    /// Terminates the active session. Its artifacts stay where they are.
    pub fn terminate_session(&mut self) -> Result<()> {
        let session = self.session.as_mut().ok_or(StateErr::NoSession)?;
        session.terminate();

        info!(round = session.current_round(); "terminated session {}", session.id());
        Ok(())
    }

    fn start_session(&mut self, start: &SessionStart) -> Result<Outcome> {
        let session = self.pipeline.start_session(start)?;
        let session_id = session.id().to_string();
        let serving_dir = self.pipeline.store().serving_dir(&session_id, 0);

        if let Some(previous) = self.session.replace(session) {
            warn!(
                round = previous.current_round();
                "session {} replaced by {session_id}", previous.id()
            );
        }

        Ok(Outcome::SessionStarted {
            session_id,
            serving_dir,
        })
    }

    fn accept_update(&mut self, update: &WeightsUpdate) -> Result<Outcome> {
        let session = self.session.as_mut().ok_or(StateErr::NoSession)?;
        session.accept_update(update)?;

        Ok(Outcome::WeightsAccepted {
            session_id: session.id().to_string(),
            round: session.current_round(),
        })
    }
}
