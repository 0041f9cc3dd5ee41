use crate::agent::sync::SyncOutcome;
use crate::net::{Request, Response};

/// External signals delivered to the agent.
///
/// A closed set instead of ad hoc named-event registration: every signal the
/// platform can deliver has a variant here, and `Agent::dispatch` matches on
/// all of them, so an unhandled signal is a compile error rather than a
/// silently dropped listener.
#[derive(Debug)]
pub enum Signal {
  /// The agent has been installed and should seed its static store.
  Install,
  /// The agent is taking over and should retire superseded stores.
  Activate,
  /// An outbound request to run through the interception engine.
  Fetch(Request),
  /// A deferred-work tag is ready to run.
  Sync { tag: String },
  /// An inbound push payload, possibly without a text body.
  Push { payload: Option<String> },
  /// The user acted on a displayed notification.
  NotificationClick { action: String },
  /// Generic message channel from the application.
  Message(AgentMessage),
}

/// Commands the application can send over the message channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMessage {
  /// Force immediate supersession of an older agent instance.
  SkipWaiting,
}

/// What a dispatched signal produced.
#[derive(Debug)]
pub enum Effect {
  /// Signal handled, nothing to hand back.
  None,
  /// The response produced for a `Fetch` signal.
  Response(Response),
  /// The reported outcome of a `Sync` signal.
  Sync(SyncOutcome),
}
