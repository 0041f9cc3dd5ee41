//! Notification dispatcher.
//!
//! Push payloads arrive while the agent is active without an open page; the
//! dispatcher renders a user-facing alert through the platform UI seam and
//! routes a subsequent click back into the application. One-shot,
//! fire-and-forget: nothing is persisted and no acknowledgement goes back to
//! any server.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::config::NotificationConfig;

/// The action identifier that opens the application.
pub const ACTION_OPEN: &str = "open";
/// The action identifier that only closes the notification.
pub const ACTION_DISMISS: &str = "dismiss";

/// A notification ready for display.
#[derive(Debug, Clone)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub actions: Vec<NotificationAction>,
}

#[derive(Debug, Clone)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

/// Platform UI seam: display an alert, open or focus an application window.
pub trait NotificationSink: Send + Sync {
  fn show(&self, notification: &Notification) -> Result<()>;
  fn open_window(&self, url: &Url) -> Result<()>;
}

/// Sink that writes to the log instead of a platform UI. Used by the CLI,
/// where there is no display surface to hand the notification to.
pub struct LogSink;

impl NotificationSink for LogSink {
  fn show(&self, notification: &Notification) -> Result<()> {
    info!(title = %notification.title, body = %notification.body, "notification displayed");
    Ok(())
  }

  fn open_window(&self, url: &Url) -> Result<()> {
    info!(%url, "application window opened");
    Ok(())
  }
}

/// Builds notifications from push payloads and routes clicks.
pub struct NotificationDispatcher {
  config: NotificationConfig,
  target: Url,
  sink: Arc<dyn NotificationSink>,
}

impl NotificationDispatcher {
  pub fn new(
    config: NotificationConfig,
    origin: &Url,
    sink: Arc<dyn NotificationSink>,
  ) -> Result<Self> {
    let target = origin
      .join(&config.target_path)
      .map_err(|e| eyre!("Invalid notification target {}: {}", config.target_path, e))?;

    Ok(Self {
      config,
      target,
      sink,
    })
  }

  /// Display a notification for an inbound push. The payload is advisory:
  /// an absent or empty body falls back to the configured default text.
  pub fn on_push(&self, payload: Option<&str>) -> Result<()> {
    let body = match payload {
      Some(text) if !text.trim().is_empty() => text.to_string(),
      _ => self.config.default_body.clone(),
    };

    let notification = Notification {
      title: self.config.title.clone(),
      body,
      icon: self.config.icon.clone(),
      badge: self.config.badge.clone(),
      actions: vec![
        NotificationAction {
          action: ACTION_OPEN.to_string(),
          title: "Open".to_string(),
        },
        NotificationAction {
          action: ACTION_DISMISS.to_string(),
          title: "Dismiss".to_string(),
        },
      ],
    };

    self.sink.show(&notification)
  }

  /// Route a user interaction. Only the open action has a side effect;
  /// everything else just closes the display.
  pub fn on_click(&self, action: &str) -> Result<()> {
    if action == ACTION_OPEN {
      self.sink.open_window(&self.target)
    } else {
      debug!(action, "notification dismissed");
      Ok(())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::agent::support::{test_agent, test_config, RecordingSink, ScriptedFetcher};
  use crate::event::Signal;

  fn dispatcher(sink: Arc<RecordingSink>) -> NotificationDispatcher {
    let origin = Url::parse("https://app.example.com").unwrap();
    NotificationDispatcher::new(NotificationConfig::default(), &origin, sink).unwrap()
  }

  #[test]
  fn push_with_text_uses_the_payload_body() {
    let sink = Arc::new(RecordingSink::default());
    dispatcher(sink.clone()).on_push(Some("Evening update ready")).unwrap();

    let shown = sink.shown.lock().unwrap();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].body, "Evening update ready");
    let actions: Vec<&str> = shown[0].actions.iter().map(|a| a.action.as_str()).collect();
    assert_eq!(actions, vec![ACTION_OPEN, ACTION_DISMISS]);
  }

  #[test]
  fn empty_push_falls_back_to_the_default_body() {
    let sink = Arc::new(RecordingSink::default());
    let dispatcher = dispatcher(sink.clone());

    dispatcher.on_push(None).unwrap();
    dispatcher.on_push(Some("   ")).unwrap();

    let shown = sink.shown.lock().unwrap();
    assert_eq!(shown.len(), 2);
    for notification in shown.iter() {
      assert_eq!(notification.body, "New content is available.");
      assert!(!notification.body.is_empty());
    }
  }

  #[test]
  fn only_the_open_action_opens_a_window() {
    let sink = Arc::new(RecordingSink::default());
    let dispatcher = dispatcher(sink.clone());

    dispatcher.on_click(ACTION_DISMISS).unwrap();
    dispatcher.on_click("something-else").unwrap();
    assert!(sink.opened.lock().unwrap().is_empty());

    dispatcher.on_click(ACTION_OPEN).unwrap();
    let opened = sink.opened.lock().unwrap();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].as_str(), "https://app.example.com/");
  }

  #[tokio::test]
  async fn push_and_click_signals_route_through_dispatch() {
    let (agent, sink) = test_agent(test_config(), ScriptedFetcher::new());

    agent.dispatch(Signal::Push { payload: None }).await.unwrap();
    agent
      .dispatch(Signal::NotificationClick {
        action: ACTION_OPEN.to_string(),
      })
      .await
      .unwrap();

    assert_eq!(sink.shown.lock().unwrap().len(), 1);
    let opened = sink.opened.lock().unwrap();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].as_str(), "https://app.example.com/");
  }
}
