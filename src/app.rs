use color_eyre::eyre::eyre;
use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cache::{CacheStorage, NoopStorage, QueryCache, SqliteStorage};
use crate::commands::{Command, CreateArgs};
use crate::config::Config;
use crate::diary::{SiteDiaryApi, SiteDiaryClient};
use crate::event::{Event, EventHandler};
use crate::graphql::HttpTransport;
use crate::network::{ManualConnectivity, NetworkMonitor, NetworkState, TcpProbe};
use crate::query::QueryView;
use crate::render;

/// Flags that change how the stack is wired
#[derive(Debug, Clone, Copy, Default)]
pub struct AppOptions {
  /// Pin the network to offline
  pub offline: bool,
  /// Keep the cache in memory only
  pub no_cache: bool,
}

/// Main application state
pub struct App {
  config: Config,
  api: SiteDiaryApi,
}

impl App {
  pub async fn new(config: Config, options: AppOptions) -> Result<Self> {
    let monitor = if options.offline {
      info!("Starting in forced offline mode");
      NetworkMonitor::new(ManualConnectivity::new(NetworkState::offline()))
    } else {
      NetworkMonitor::new(TcpProbe::for_endpoint(
        &config.api.url,
        Duration::from_millis(config.network.probe_interval_ms),
        Duration::from_millis(config.network.probe_timeout_ms),
      )?)
    };
    let state = monitor.ready().await;
    info!("Network state at startup: {:?}", state);

    let storage: Arc<dyn CacheStorage> = if options.no_cache || !config.cache.persist {
      Arc::new(NoopStorage)
    } else {
      match SqliteStorage::open() {
        Ok(storage) => Arc::new(storage),
        Err(e) => {
          warn!("Cache storage unavailable, continuing in memory: {}", e);
          Arc::new(NoopStorage)
        }
      }
    };

    let cache = QueryCache::new(storage, monitor);
    let transport = HttpTransport::new(&config.api)?;
    let client = SiteDiaryClient::new(Arc::new(transport));
    let api = SiteDiaryApi::new(client, cache, config.policy_table(), config.summary_capability());

    Ok(Self { config, api })
  }

  pub async fn run(&self, command: Command) -> Result<()> {
    match command {
      Command::List => self.list().await,
      Command::Show { id } => self.show(&id).await,
      Command::Create(args) => self.create(args).await,
      Command::Summary => self.summary().await,
      Command::Watch => self.watch().await,
    }
  }

  async fn list(&self) -> Result<()> {
    let mut query = self.api.site_diaries();
    query.fetch();
    let view = query.settle().await;
    print!("{}", render::diary_list(&view));
    fail_without_data(&view)
  }

  async fn show(&self, id: &str) -> Result<()> {
    let mut query = self.api.site_diary(Some(id));
    query.fetch();
    let view = query.settle().await;
    print!("{}", render::diary_detail(id, &view));
    fail_without_data(&view)
  }

  async fn summary(&self) -> Result<()> {
    let mut query = self.api.weekly_summary();
    query.fetch();
    let view = query.settle().await;
    print!("{}", render::weekly_summary(&view));
    fail_without_data(&view)
  }

  async fn create(&self, args: CreateArgs) -> Result<()> {
    let input = args.into_input()?;
    let mutation = self.api.create_site_diary();
    let created = mutation.create(input).await.map_err(|e| eyre!("{}", e))?;
    println!("Created site diary {} ({})", created.id, created.title);
    Ok(())
  }

  /// Keep the list on screen, re-rendering when the cache or the network
  /// changes.
  async fn watch(&self) -> Result<()> {
    let gc_after = Duration::from_secs(self.config.cache.gc_secs);
    let mut query = self.api.site_diaries();
    query.fetch();
    println!("{}", render::diary_list(&query.view()));

    let mut events = EventHandler::new(Duration::from_millis(250));
    let mut last_gc = tokio::time::Instant::now();

    while let Some(event) = events.next().await {
      match event {
        Event::Tick => {
          if query.poll() {
            println!("{}", render::diary_list(&query.view()));
          }
          if last_gc.elapsed() >= gc_after {
            self.api.cache().collect_garbage(gc_after);
            last_gc = tokio::time::Instant::now();
          }
        }
        Event::Focus => {
          if query.is_offline() {
            println!("[offline] refresh skipped, showing cached data");
          } else {
            query.on_focus();
            println!("{}", render::diary_list(&query.view()));
          }
        }
        Event::Quit => break,
      }
    }

    Ok(())
  }
}

/// Exit non-zero when there was nothing to show and the fetch failed.
fn fail_without_data<T>(view: &QueryView<T>) -> Result<()> {
  match (&view.data, &view.error) {
    (None, Some(error)) => Err(eyre!("{}", error)),
    _ => Ok(()),
  }
}
