use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use shared::protocol::{CandidateSummary, NotificationSummary, VacancySummary};
use table_core::{
    load_settings, CollectionFetcher, HttpCollectionFetcher, PageSizeSettings, TableController,
    TableControllerConfig, TableEvent, TableStateStore,
};
use url::Url;

const SEARCH_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "http://127.0.0.1:8000/api")]
    server_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ViewArgs {
    #[arg(long, default_value = "")]
    search: String,
    /// Sort spec sent to the API, e.g. `verb` or `-timestamp`.
    #[arg(long)]
    ordering: Option<String>,
    #[arg(long, default_value_t = 0)]
    page: u32,
    #[arg(long)]
    limit: Option<u32>,
}

#[derive(Subcommand, Debug)]
enum Command {
    Notifications {
        #[command(flatten)]
        view: ViewArgs,
    },
    Candidates {
        #[command(flatten)]
        view: ViewArgs,
        #[arg(long)]
        vacancy: Option<i64>,
    },
    Vacancies {
        #[command(flatten)]
        view: ViewArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let cli = Cli::parse();
    Url::parse(&cli.server_url).context("invalid --server-url")?;

    let store = TableStateStore::new();
    let settings = load_settings();

    match cli.command {
        Command::Notifications { view } => {
            let controller = list_controller::<NotificationSummary>(
                &cli.server_url,
                "notifications",
                "-timestamp",
                &view,
                TableControllerConfig::new("notifications"),
                &store,
                &settings,
            );
            drive_view(&controller, &view).await?;
            let snapshot = controller.snapshot();
            for row in &snapshot.rows {
                let marker = if row.unread { "*" } else { " " };
                println!(
                    "{marker} {:>6}  {:<14} {:<18} {}",
                    row.notification_id.0,
                    row.verb,
                    row.actor,
                    row.timestamp.to_rfc3339()
                );
            }
            println!("{} of {} notifications", snapshot.rows.len(), snapshot.total);
        }
        Command::Candidates { view, vacancy } => {
            let mut config = TableControllerConfig::new("candidates");
            if let Some(vacancy_id) = vacancy {
                config = config.static_param("vacancy", vacancy_id.to_string());
            }
            let controller = list_controller::<CandidateSummary>(
                &cli.server_url,
                "candidates",
                "-applied_at",
                &view,
                config,
                &store,
                &settings,
            );
            drive_view(&controller, &view).await?;
            let snapshot = controller.snapshot();
            for row in &snapshot.rows {
                println!(
                    "{:>6}  {:<24} {:<10?} {}",
                    row.candidate_id.0,
                    format!("{} {}", row.first_name, row.last_name),
                    row.stage,
                    row.email.as_deref().unwrap_or("-")
                );
            }
            println!("{} of {} candidates", snapshot.rows.len(), snapshot.total);
        }
        Command::Vacancies { view } => {
            let controller = list_controller::<VacancySummary>(
                &cli.server_url,
                "vacancies",
                "-opened_at",
                &view,
                TableControllerConfig::new("vacancies"),
                &store,
                &settings,
            );
            drive_view(&controller, &view).await?;
            let snapshot = controller.snapshot();
            for row in &snapshot.rows {
                println!(
                    "{:>6}  {:<28} {:<16} {:?}",
                    row.vacancy_id.0, row.title, row.department, row.status
                );
            }
            println!("{} of {} vacancies", snapshot.rows.len(), snapshot.total);
        }
    }

    Ok(())
}

fn list_controller<R>(
    server_url: &str,
    path: &str,
    default_sort: &str,
    view: &ViewArgs,
    config: TableControllerConfig,
    store: &TableStateStore,
    settings: &PageSizeSettings,
) -> Arc<TableController<R>>
where
    R: serde::de::DeserializeOwned + Clone + Send + Sync + 'static,
{
    let collection_url = format!("{}/{path}", server_url.trim_end_matches('/'));
    let fetcher: Arc<dyn CollectionFetcher<R>> =
        Arc::new(HttpCollectionFetcher::new(collection_url));
    let ordering = view.ordering.clone().unwrap_or_else(|| default_sort.to_string());
    TableController::new(fetcher, store.clone(), config.default_sort(ordering), settings)
}

/// Mounts the table, applies page/limit/search from the CLI, and waits for
/// the final page. Search goes through the debounced path, so the outcome
/// is awaited on the event stream.
async fn drive_view<R>(controller: &Arc<TableController<R>>, view: &ViewArgs) -> Result<()>
where
    R: Clone + Send + Sync + 'static,
{
    controller.mount().await;

    if let Some(limit) = view.limit {
        controller.set_limit(limit).await;
    }
    if view.page > 0 {
        let limit = controller
            .state()
            .map(|state| state.limit)
            .unwrap_or(table_core::DEFAULT_PAGE_SIZE);
        controller.set_offset(view.page * limit).await;
    }

    if !view.search.is_empty() {
        let mut events = controller.subscribe_events();
        controller.set_search(view.search.as_str());
        let event = tokio::time::timeout(SEARCH_DEADLINE, events.recv())
            .await
            .context("timed out waiting for search results")?
            .context("controller event stream closed")?;
        if let TableEvent::FetchFailed { error, .. } = event {
            bail!("search fetch failed: {error}");
        }
    }

    let snapshot = controller.snapshot();
    if let Some(error) = snapshot.error {
        bail!("list fetch failed: {error}");
    }

    Ok(())
}
