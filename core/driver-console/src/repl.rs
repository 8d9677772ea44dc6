//! Interactive driver console.
//!
//! One command per line, parsed with clap. Before each command the core gets
//! a `tick` so automatic retries happen while the operator is working; after
//! each command the core's events are rendered as short notices.

use std::io::{self, BufRead, Write};

use chrono::{Duration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use trip_core::{
    CoreEvent, DriverApp, FlushOutcome, KeyValueStore, NetworkStatus, PendingChange, SettingKey,
    Transport, TripError, TripPhase, TripRecord, DEFAULT_RETENTION_DAYS,
};

#[derive(Parser, Debug)]
#[command(
    name = "driver",
    no_binary_name = true,
    disable_version_flag = true,
    help_template = "{subcommands}"
)]
struct Line {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with driver id and 4-digit PIN
    Login {
        driver_id: String,
        pin: String,
        /// Bus number (default 101)
        #[arg(long)]
        bus: Option<String>,
        /// Keep the driver signed in across restarts
        #[arg(long)]
        remember: bool,
    },
    /// Sign out (not allowed during a trip)
    Logout,
    /// Start a trip on the route
    Start,
    /// Check in at the next stop
    #[command(name = "checkin", alias = "check-in")]
    CheckIn,
    /// End the trip once every stop is checked in
    End,
    /// Change the passenger count by a delta, e.g. 3 or -2
    Adjust {
        #[arg(allow_negative_numbers = true)]
        delta: i32,
    },
    /// Set the passenger count
    Count { value: u32 },
    /// Sync finished trips now
    Sync,
    /// Continue an interrupted trip
    Resume,
    /// Throw away an interrupted trip
    Discard,
    /// Report connectivity: offline, wifi, cellular, unknown
    Network { status: NetworkStatus },
    /// Change a setting: vibration, sound, wifiOnly, brightness
    Set { key: SettingKey, value: Toggle },
    /// Drop synced trips older than N days
    Purge {
        #[arg(long, default_value_t = DEFAULT_RETENTION_DAYS)]
        days: i64,
    },
    /// Show trip and sync state
    Status,
    /// List synced trips
    History,
    /// Queue a student preference change; the rest of the line is JSON data
    Change { kind: String, data: Option<String> },
    /// Sync queued preference changes
    SyncChanges,
    /// Leave the console
    #[command(alias = "exit")]
    Quit,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn enabled(self) -> bool {
        matches!(self, Toggle::On)
    }
}

enum Flow {
    Continue,
    Quit,
}

pub struct Console<'a, S, T, W> {
    app: &'a mut DriverApp<S, T>,
    out: W,
}

impl<'a, S, T, W> Console<'a, S, T, W>
where
    S: KeyValueStore,
    T: Transport<TripRecord> + Transport<PendingChange>,
    W: Write,
{
    pub fn new(app: &'a mut DriverApp<S, T>, out: W) -> Self {
        Self { app, out }
    }

    pub fn run(&mut self, input: impl BufRead) -> io::Result<()> {
        writeln!(
            self.out,
            "bustrack driver | route {} ({} stops) | type 'help' for commands",
            self.app.route().name(),
            self.app.route().total_stops()
        )?;
        self.render_events()?;
        if self.app.recovery_prompt().is_some() {
            writeln!(self.out, "Type 'resume' or 'discard' to continue.")?;
        }

        for line in input.lines() {
            let line = line?;
            let words = split_line(&line);
            if words.is_empty() {
                continue;
            }

            let command = match Line::try_parse_from(words) {
                Ok(parsed) => parsed.command,
                Err(err) => {
                    write!(self.out, "{}", err.render())?;
                    continue;
                }
            };

            if let Err(err) = self.app.tick(Utc::now()) {
                writeln!(self.out, "Error: {}", err)?;
            }

            let flow = match self.execute(command) {
                Ok(flow) => flow,
                Err(err) => {
                    tracing::warn!(error = %err, "Command failed");
                    writeln!(self.out, "Error: {}", err)?;
                    Flow::Continue
                }
            };
            self.render_events()?;
            if let Flow::Quit = flow {
                break;
            }
        }
        self.out.flush()
    }

    fn execute(&mut self, command: Command) -> Result<Flow, TripError> {
        match command {
            Command::Login {
                driver_id,
                pin,
                bus,
                remember,
            } => {
                let identity = self
                    .app
                    .login(&driver_id, &pin, bus.as_deref(), remember)?;
                let line = format!("Welcome, {} (bus {})", identity.name, identity.bus_number);
                self.say(&line);
            }
            Command::Logout => {
                self.app.logout()?;
                self.say("Signed out");
            }
            Command::Start => {
                self.app.start_trip()?;
                self.say(&status_line(self.app));
            }
            Command::CheckIn => {
                self.app.check_in_next_stop()?;
                self.say(&status_line(self.app));
            }
            Command::End => {
                self.app.end_trip()?;
            }
            Command::Adjust { delta } => {
                let count = self.app.adjust_count(delta)?;
                self.say(&format!("Passengers: {}", count));
            }
            Command::Count { value } => {
                let count = self.app.set_count(value)?;
                self.say(&format!("Passengers: {}", count));
            }
            Command::Sync => match self.app.request_sync()? {
                FlushOutcome::Empty => self.say("Nothing to sync"),
                FlushOutcome::InFlight => self.say("Sync already running"),
                FlushOutcome::Deferred(_) | FlushOutcome::Delivered(_) => {}
            },
            Command::Resume => {
                self.app.resume_trip()?;
                self.say(&status_line(self.app));
            }
            Command::Discard => {
                self.app.discard_trip()?;
            }
            Command::Network { status } => {
                self.app.set_network(status)?;
                self.say(&format!("Network: {}", status));
            }
            Command::Set { key, value } => {
                self.app.update_settings(key, value.enabled())?;
            }
            Command::Purge { days } => {
                self.app.purge_history(Duration::days(days))?;
            }
            Command::Status => {
                self.say(&status_line(self.app));
                self.say(&sync_line(self.app));
            }
            Command::History => {
                if self.app.history().is_empty() {
                    self.say("No synced trips");
                }
                let lines: Vec<String> = self.app.history().iter().map(history_line).collect();
                for line in lines {
                    self.say(&line);
                }
            }
            Command::Change { kind, data } => {
                let data = match data {
                    Some(raw) => serde_json::from_str(&raw).map_err(|source| TripError::Json {
                        context: "parsing change data".to_string(),
                        source,
                    })?,
                    None => serde_json::Value::Null,
                };
                let id = self.app.record_change(&kind, data)?;
                self.say(&format!("Change {} queued", id));
            }
            Command::SyncChanges => match self.app.sync_changes()? {
                FlushOutcome::Delivered(report) => {
                    self.say(&format!("{} changes synced", report.delivered.len()))
                }
                FlushOutcome::Deferred(reason) => {
                    self.say(&format!("Changes postponed: {}", reason))
                }
                FlushOutcome::Empty | FlushOutcome::InFlight => self.say("No changes to sync"),
            },
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    fn say(&mut self, line: &str) {
        if let Err(err) = writeln!(self.out, "{}", line) {
            tracing::warn!(error = %err, "Failed to write console output");
        }
    }

    fn render_events(&mut self) -> io::Result<()> {
        let sound = self.app.settings().sound;
        for event in self.app.drain_events() {
            if sound && is_audible(&event) {
                write!(self.out, "\x07")?;
            }
            if let Some(toast) = event.toast() {
                writeln!(self.out, "* {}", toast)?;
            }
        }
        Ok(())
    }
}

/// Splits a command line into words. For `change`, everything after the
/// kind is kept as one argument so JSON data may contain spaces.
fn split_line(line: &str) -> Vec<&str> {
    let mut words = Vec::new();
    let mut rest = line.trim();
    while !rest.is_empty() {
        if words.len() == 2 && words[0] == "change" {
            words.push(rest);
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        words.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    words
}

fn is_audible(event: &CoreEvent) -> bool {
    matches!(
        event,
        CoreEvent::TripStarted { .. } | CoreEvent::StopReached { .. } | CoreEvent::TripCompleted { .. }
    )
}

pub fn status_line<S, T>(app: &DriverApp<S, T>) -> String
where
    S: KeyValueStore,
    T: Transport<TripRecord> + Transport<PendingChange>,
{
    let route = app.route();
    match app.phase() {
        TripPhase::Idle if app.recovery_prompt().is_some() => {
            "Interrupted trip waiting for resume or discard".to_string()
        }
        TripPhase::Idle => format!("Idle | {} ({} stops)", route.name(), route.total_stops()),
        TripPhase::InProgress { current_stop_index } => {
            let next = route
                .stop(current_stop_index)
                .map_or("-", |stop| stop.name.as_str());
            format!(
                "Stop {}/{} | Next: {} | Passengers: {}",
                current_stop_index,
                route.total_stops(),
                next,
                app.passengers()
            )
        }
        TripPhase::ReadyToEnd => format!(
            "All {} stops done | Passengers: {} | ready to end",
            route.total_stops(),
            app.passengers()
        ),
    }
}

pub fn sync_line<S, T>(app: &DriverApp<S, T>) -> String
where
    S: KeyValueStore,
    T: Transport<TripRecord> + Transport<PendingChange>,
{
    format!(
        "Sync: {} | {} pending | Last sync: {} | Network: {}",
        app.sync_status(),
        app.pending_count(),
        app.last_sync_label(),
        app.network()
    )
}

fn history_line(trip: &TripRecord) -> String {
    format!(
        "{} | {} | {} -> {} | {} stops | {} passengers",
        trip.id,
        trip.route_name,
        trip.start_time.format("%Y-%m-%d %H:%M"),
        trip.end_time.format("%H:%M"),
        trip.stops.len(),
        trip.total_passengers
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use trip_core::{DeliveryError, MemoryStore, Route};

    #[derive(Default)]
    struct Link {
        down: bool,
        trips: usize,
    }

    impl Transport<TripRecord> for Link {
        fn send(&mut self, batch: &[TripRecord]) -> Result<(), DeliveryError> {
            if self.down {
                return Err(DeliveryError::Timeout);
            }
            self.trips += batch.len();
            Ok(())
        }
    }

    impl Transport<PendingChange> for Link {
        fn send(&mut self, _batch: &[PendingChange]) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    fn run_script(app: &mut DriverApp<MemoryStore, Link>, script: &str) -> String {
        let mut out = Vec::new();
        Console::new(app, &mut out)
            .run(Cursor::new(script.to_string()))
            .unwrap();
        String::from_utf8(out).unwrap()
    }

    fn app() -> DriverApp<MemoryStore, Link> {
        DriverApp::open(MemoryStore::new(), Route::default(), Link::default()).unwrap()
    }

    #[test]
    fn full_trip_from_the_console() {
        let mut app = app();
        let mut script = String::from("login D-7 4321 --bus 214\nstart\ncount 12\n");
        for _ in 0..7 {
            script.push_str("checkin\n");
        }
        script.push_str("end\nstatus\n");

        let output = run_script(&mut app, &script);
        assert!(output.contains("Welcome, Driver D-7 (bus 214)"));
        assert!(output.contains("* Trip Started!"));
        assert!(output.contains("* Main Gate ✓ (1/7)"));
        assert!(output.contains("* Hostel Gate ✓ (7/7)"));
        assert!(output.contains("* Data synced successfully!"));
        assert!(output.contains("Sync: synced | 0 pending"));
        assert_eq!(app.transport_mut().trips, 1);
    }

    #[test]
    fn errors_are_reported_and_console_continues() {
        let mut app = app();
        let output = run_script(&mut app, "checkin\nstart\nadjust -4\nquit\nstart\n");
        assert!(output.contains("Error: invalid transition from state idle via action check-in"));
        assert!(output.contains("Error: No driver is signed in"));
        assert!(output.contains("Error: invalid transition from state idle via action adjust-count"));
        assert_eq!(app.phase(), TripPhase::Idle);
    }

    #[test]
    fn unknown_commands_show_usage() {
        let mut app = app();
        let output = run_script(&mut app, "fly\nnetwork satellite\n");
        assert!(output.contains("fly"));
        assert!(output.contains("satellite"));
    }

    #[test]
    fn offline_end_keeps_trip_pending() {
        let mut app = app();
        let mut script = String::from("login D-7 4321\nnetwork offline\nstart\n");
        for _ in 0..7 {
            script.push_str("checkin\n");
        }
        script.push_str("end\nstatus\n");

        let output = run_script(&mut app, &script);
        assert!(output.contains("* Sync postponed: no internet connection"));
        assert!(output.contains("Sync: offline | 1 pending"));
        assert_eq!(app.pending_count(), 1);
    }

    #[test]
    fn change_data_may_contain_spaces() {
        assert_eq!(
            split_line("  change favorite {\"stopId\": 3, \"on\": true} "),
            vec!["change", "favorite", "{\"stopId\": 3, \"on\": true}"]
        );
        assert_eq!(split_line("adjust   -2"), vec!["adjust", "-2"]);
        assert!(split_line("   ").is_empty());

        let mut app = app();
        let output = run_script(&mut app, "change favorite {\"stopId\": 3}\nsync-changes\n");
        assert!(output.contains("queued"), "output: {}", output);
        assert!(output.contains("1 changes synced"));
    }

    #[test]
    fn settings_and_changes() {
        let mut app = app();
        let output = run_script(
            &mut app,
            "set wifiOnly off\nset sound on\nchange favorite {\"stopId\":3}\nsync-changes\n",
        );
        assert!(output.contains("* Setting saved"));
        assert!(!app.settings().wifi_only);
        assert!(app.settings().sound);
        assert!(output.contains("1 changes synced"));
    }
}
