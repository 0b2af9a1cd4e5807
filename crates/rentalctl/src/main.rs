//! rentalctl - counter console and live display for rentald

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use rental_api::{
    Command, Event, EventPayload, FinishOutcome, HistoryFilter, Quote, RentalModeTag,
    ResourceView, ResponsePayload, SessionInfo, SessionState, UsageStats,
};
use rental_ipc::{IpcClient, IpcError, Observer, ObserverOptions, ObserverSink, ObserverView};
use rental_util::{default_socket_path, format_elapsed, ResourceId, SessionId};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rentalctl")]
#[command(about = "Operate and watch rentald", long_about = None)]
struct Cli {
    /// Socket path (or set RENTAL_SOCKET env var)
    #[arg(short, long, env = "RENTAL_SOCKET", default_value_os_t = default_socket_path())]
    socket: PathBuf,

    /// Print raw JSON replies
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Start a rental; open-ended unless --minutes is given
    Start {
        resource: String,
        customer: String,
        /// Fixed duration in minutes
        #[arg(short, long)]
        minutes: Option<u32>,
    },
    Pause {
        #[arg(value_parser = parse_session_id)]
        session: SessionId,
    },
    Resume {
        #[arg(value_parser = parse_session_id)]
        session: SessionId,
    },
    /// Finish a rental and print the bill
    Finish {
        #[arg(value_parser = parse_session_id)]
        session: SessionId,
    },
    /// In-progress rentals
    List,
    /// Resources and their availability
    Resources,
    /// Current cost of an in-progress rental
    Quote {
        #[arg(value_parser = parse_session_id)]
        session: SessionId,
    },
    /// Completed rentals
    History {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Totals over completed rentals
    Stats {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Delete completed rentals (admin)
    ClearHistory {
        /// Only rentals completed before this time (RFC 3339)
        #[arg(long)]
        before: Option<DateTime<Local>>,
    },
    Health,
    /// Live display of in-progress rentals
    Watch {
        /// Seconds between reconnect attempts
        #[arg(long, default_value_t = 2)]
        reconnect_secs: u64,
    },
}

#[derive(clap::Args, Debug)]
struct FilterArgs {
    #[arg(long)]
    resource: Option<String>,
    /// Case-insensitive part of the customer name
    #[arg(long)]
    customer: Option<String>,
    /// Completed at or after (RFC 3339)
    #[arg(long)]
    since: Option<DateTime<Local>>,
    /// Completed before (RFC 3339)
    #[arg(long)]
    until: Option<DateTime<Local>>,
    #[arg(long)]
    limit: Option<usize>,
}

impl From<FilterArgs> for HistoryFilter {
    fn from(args: FilterArgs) -> Self {
        HistoryFilter {
            resource_id: args.resource.map(ResourceId::new),
            customer: args.customer,
            since: args.since,
            until: args.until,
            limit: args.limit,
        }
    }
}

fn parse_session_id(s: &str) -> Result<SessionId, String> {
    SessionId::parse(s).ok_or_else(|| format!("not a session id: {}", s))
}

fn session_line(session: &SessionInfo, now: DateTime<Local>) -> String {
    let mode = match session.mode.fixed_minutes() {
        Some(minutes) => format!("{} min", minutes),
        None => "open".to_string(),
    };
    format!(
        "{}  {:<14} {:<18} {:<9} {:>8}  {}",
        session.session_id,
        session.resource_label,
        session.customer_name,
        session.state.as_str(),
        format_elapsed(session.elapsed_at(now)),
        mode,
    )
}

fn print_finish(outcome: &FinishOutcome) {
    println!(
        "{} finished: {} min billed, {}",
        outcome.session.customer_name, outcome.billed_minutes, outcome.billed_amount
    );
    if let Some(converted) = &outcome.converted {
        println!("  = {}", converted);
    }
}

fn print_quote(quote: &Quote) {
    println!(
        "{} on {}: {} elapsed, {} min billable, {} so far",
        quote.session.customer_name,
        quote.session.resource_label,
        format_elapsed(Duration::from_millis(quote.elapsed_ms)),
        quote.bill.billable_minutes,
        quote.bill.amount,
    );
    if let Some(remaining) = quote.remaining_minutes {
        println!("  {} min remaining", remaining);
    }
    if let Some(converted) = &quote.converted {
        println!("  = {}", converted);
    }
}

fn print_resources(resources: &[ResourceView]) {
    for r in resources {
        let status = match (&r.current_session, r.active) {
            (_, false) => "inactive".to_string(),
            (Some(session), true) => format!("in use ({})", session),
            (None, true) => "free".to_string(),
        };
        println!("{:<12} {:<16} {:>8}/h  {}", r.resource_id, r.label, r.hourly_rate, status);
    }
}

fn print_stats(stats: &UsageStats) {
    println!("Sessions:        {}", stats.total_sessions);
    println!("Minutes used:    {}", stats.total_raw_minutes);
    println!("Minutes billed:  {}", stats.total_billed_minutes);
    println!("Revenue:         {}", stats.revenue);
    println!("Avg billed/sess: {} min, {}", stats.average_billed_minutes, stats.average_revenue);
    if let Some(converted) = &stats.converted_revenue {
        println!("Revenue (display currency): {}", converted);
    }
}

fn print_payload(payload: &ResponsePayload) {
    let now = rental_util::now();
    match payload {
        ResponsePayload::Session(session) => println!("{}", session_line(session, now)),
        ResponsePayload::Finished(outcome) => print_finish(outcome),
        ResponsePayload::Snapshot(snapshot) => {
            if snapshot.sessions.is_empty() {
                println!("No rentals in progress");
            }
            for session in &snapshot.sessions {
                println!("{}", session_line(session, snapshot.server_time));
            }
        }
        ResponsePayload::Sessions { sessions } => {
            for session in sessions {
                let billed = session
                    .completion
                    .as_ref()
                    .map(|c| {
                        format!(
                            "{}  {} min  {}",
                            rental_util::format_datetime_full(&c.completed_at),
                            c.billed_minutes,
                            c.billed_amount
                        )
                    })
                    .unwrap_or_default();
                println!(
                    "{:<14} {:<18} {}",
                    session.resource_label, session.customer_name, billed
                );
            }
        }
        ResponsePayload::Stats(stats) => print_stats(stats),
        ResponsePayload::Resources { resources } => print_resources(resources),
        ResponsePayload::Quote(quote) => print_quote(quote),
        ResponsePayload::HistoryCleared { removed } => println!("Removed {} rentals", removed),
        ResponsePayload::Health(health) => println!(
            "live={} ready={} store_ok={} active_sessions={} clients={}",
            health.live,
            health.ready,
            health.store_ok,
            health.active_sessions,
            health.connected_clients
        ),
        other => println!("{:?}", other),
    }
}

/// Prints transitions and redraws the board on every clock tick
struct Board;

impl Board {
    fn draw(view: &ObserverView, now: DateTime<Local>) {
        let server_now = view.server_now(now);
        // Clear screen, cursor home
        print!("\x1b[2J\x1b[H");
        println!(
            "rentald  {}{}",
            rental_util::format_clock_time(&server_now),
            if view.is_synced() { "" } else { "  (reconnecting)" }
        );
        for session in view.live_sessions() {
            let marker = if session.state == SessionState::Paused { "||" } else { ">" };
            println!("{:>2} {}", marker, session_line(session, server_now));
        }
    }
}

impl ObserverSink for Board {
    fn on_snapshot(&self, view: &ObserverView) {
        Self::draw(view, rental_util::now());
    }

    fn on_event(&self, event: &Event, view: &ObserverView, changed: bool) {
        if changed {
            Self::draw(view, rental_util::now());
        }
        if let EventPayload::ExpiryWarning {
            customer_name,
            remaining_minutes,
            ..
        } = &event.payload
        {
            println!("!! {}: {} min left", customer_name, remaining_minutes);
        }
    }

    fn on_clock(&self, view: &ObserverView, local_now: DateTime<Local>) {
        Self::draw(view, local_now);
    }

    fn on_disconnect(&self, error: &IpcError) {
        eprintln!("Disconnected from rentald: {}", error);
    }
}

async fn watch(socket: PathBuf, reconnect_secs: u64) -> Result<()> {
    let observer = Observer::new(
        &socket,
        ObserverOptions {
            reconnect_delay: Duration::from_secs(reconnect_secs.max(1)),
            ..ObserverOptions::default()
        },
    );

    tokio::select! {
        _ = observer.run(Arc::new(Board)) => Ok(()),
        result = tokio::signal::ctrl_c() => result.context("Failed to wait for Ctrl-C"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let command = match cli.command {
        Cmd::Watch { reconnect_secs } => return watch(cli.socket, reconnect_secs).await,
        Cmd::Start {
            resource,
            customer,
            minutes,
        } => Command::Start {
            resource_id: ResourceId::new(resource),
            customer_name: customer,
            mode: if minutes.is_some() {
                RentalModeTag::FixedDuration
            } else {
                RentalModeTag::OpenEnded
            },
            duration_minutes: minutes,
        },
        Cmd::Pause { session } => Command::Pause {
            session_id: session,
        },
        Cmd::Resume { session } => Command::Resume {
            session_id: session,
        },
        Cmd::Finish { session } => Command::Finish {
            session_id: session,
        },
        Cmd::List => Command::ListActive,
        Cmd::Resources => Command::ListResources,
        Cmd::Quote { session } => Command::Quote {
            session_id: session,
        },
        Cmd::History { filter } => Command::History {
            filter: filter.into(),
        },
        Cmd::Stats { filter } => Command::Stats {
            filter: filter.into(),
        },
        Cmd::ClearHistory { before } => Command::ClearHistory { before },
        Cmd::Health => Command::GetHealth,
    };

    let mut client = IpcClient::connect(&cli.socket)
        .await
        .with_context(|| format!("Failed to connect to rentald at {:?}", cli.socket))?;

    let response = client.send(command).await?;
    match response.result {
        rental_api::ResponseResult::Ok(payload) => {
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                print_payload(&payload);
            }
            Ok(())
        }
        rental_api::ResponseResult::Err(e) => bail!("{:?}: {}", e.code, e.message),
    }
}
