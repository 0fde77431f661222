use crate::error::StoreError;
use crate::model::{Command, Outcome};
use crate::orchestrator::PanelView;
use crate::registry::Subscription;

/// Screen state. Owned by the UI thread; subscription callbacks mutate it
/// only while the UI thread drains the delivery queue.
#[derive(Default)]
pub struct UiState {
    pub show_help: bool,
    pub attached: bool,
    pub info: String,

    pub server_status: String,
    pub status_ok: Option<bool>,
    pub last_command: Option<Command>,
    pub last_updated: Option<String>,
    /// Commands issued and not answered yet.
    pub in_flight: Vec<Command>,

    pub user_name: String,
    pub input: String,
    pub editing: bool,
    /// Set while a user name update is pending; the update key is disabled meanwhile.
    pub update_pending: Option<Subscription>,
}

impl UiState {
    pub fn command_issued(&mut self, command: Command) {
        self.in_flight.push(command);
        self.info = format!("Waiting for {command}…");
    }

    /// Forget everything that was waiting on a response.
    pub fn detached(&mut self, cancelled: usize) {
        self.attached = false;
        self.in_flight.clear();
        self.update_pending = None;
        self.info = format!("Detached: {cancelled} subscriptions cancelled");
    }

    pub fn can_update_user_name(&self) -> bool {
        self.update_pending.is_none()
    }
}

fn local_clock() -> String {
    let format = time::macros::format_description!("[hour]:[minute]:[second]");
    time::OffsetDateTime::now_local()
        .unwrap_or_else(|_| time::OffsetDateTime::now_utc())
        .format(&format)
        .unwrap_or_default()
}

impl PanelView for UiState {
    fn show_status(&mut self, command: Command, outcome: &Outcome) {
        if let Some(pos) = self.in_flight.iter().position(|c| *c == command) {
            self.in_flight.remove(pos);
        }
        self.server_status = outcome.text().to_string();
        self.status_ok = Some(outcome.is_success());
        self.last_command = Some(command);
        self.last_updated = Some(local_clock());
        self.info = if outcome.is_success() {
            format!("{command}: ok")
        } else {
            format!("{command}: failed")
        };
    }

    fn show_user_name(&mut self, name: &str) {
        self.user_name = name.to_string();
    }

    fn user_name_saved(&mut self) {
        self.update_pending = None;
        self.info = "User name updated".into();
    }

    fn user_name_failed(&mut self, error: &StoreError) {
        self.update_pending = None;
        self.info = format!("Unable to update user name: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_clears_matching_in_flight_command() {
        let mut state = UiState::default();
        state.command_issued(Command::Start);
        state.command_issued(Command::HealthCheck);

        state.show_status(Command::Start, &Outcome::success("starting"));
        assert_eq!(state.in_flight, vec![Command::HealthCheck]);
        assert_eq!(state.server_status, "starting");
        assert_eq!(state.status_ok, Some(true));
        assert!(state.last_updated.is_some());

        state.show_status(Command::HealthCheck, &Outcome::failure("refused"));
        assert!(state.in_flight.is_empty());
        assert_eq!(state.status_ok, Some(false));
        assert_eq!(state.info, "health: failed");
    }

    #[test]
    fn detaching_resets_pending_work() {
        let mut state = UiState {
            attached: true,
            ..Default::default()
        };
        state.command_issued(Command::Stop);
        state.detached(2);
        assert!(state.in_flight.is_empty());
        assert!(state.can_update_user_name());
        assert!(!state.attached);
        assert_eq!(state.info, "Detached: 2 subscriptions cancelled");
    }
}
