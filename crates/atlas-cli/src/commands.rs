use std::{process::ExitCode, sync::Arc};

use anyhow::Context as _;
use atlas_core::{
  region::{NewAlias, NewRegion, RegionId},
  store::DictionaryStore,
};
use atlas_pipeline::{
  AtlasConfig, Auditor, Dictionary, JobContext, Ledger, LoadRequest, Loader, Maintainer,
  maintainer::MaintainOptions,
  seed::{SeedDocument, seed},
};
use atlas_store_sqlite::SqliteStore;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::{AliasCommand, Command, RegionCommand};

pub async fn dispatch(command: Command, config: AtlasConfig) -> anyhow::Result<ExitCode> {
  let store_path = config.store_path.0.clone();
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  let store = Arc::new(store);
  let dictionary = Dictionary::new(Arc::clone(&store), config.dictionary);

  match command {
    Command::Load { source, from, to, batch_size, auto_approve_threshold } => {
      let ctx = job_context("load");
      let loader = Loader::new(Arc::clone(&store), &config);
      let report = loader
        .run(&ctx, LoadRequest {
          source_system: source,
          from,
          to,
          batch_size,
          auto_approve_threshold,
        })
        .await?;
      print_json(&report)?;
      let code = u8::try_from(report.status.exit_code()).unwrap_or(2);
      return Ok(ExitCode::from(code));
    }

    Command::Maintain { source, min_occurrence, auto_approve } => {
      let ctx = job_context("maintain");
      let maintainer = Maintainer::new(Arc::clone(&store), &config);
      let defaults = maintainer.default_options();
      let options = MaintainOptions {
        min_occurrence: min_occurrence.unwrap_or(defaults.min_occurrence),
        auto_approve:   auto_approve.unwrap_or(defaults.auto_approve),
      };
      print_json(&maintainer.run(&ctx, source, options).await?)?;
    }

    Command::Audit { from, to, source, batch } => {
      let ctx = job_context("audit");
      let auditor = Auditor::new(Arc::clone(&store), config.auditor);
      let batch = batch.unwrap_or_else(Uuid::new_v4);
      print_json(&auditor.audit(&ctx, batch, from, to, source).await?)?;
    }

    Command::Watchdog { stale_after_secs } => {
      let ledger = Ledger::new(Arc::clone(&store), config.auditor.weights);
      let stale_after = match stale_after_secs {
        Some(secs) => chrono::Duration::seconds(i64::try_from(secs)?),
        None => config.watchdog.stale_after(),
      };
      print_json(&ledger.fail_stale(stale_after).await?)?;
    }

    Command::Runs { limit, summary } => {
      let ledger = Ledger::new(Arc::clone(&store), config.auditor.weights);
      if summary {
        print_json(&ledger.summary().await?)?;
      } else {
        print_json(&ledger.recent(limit).await?)?;
      }
    }

    Command::Quality { batch } => {
      let ledger = Ledger::new(Arc::clone(&store), config.auditor.weights);
      print_json(&ledger.quality_summary(batch).await?)?;
    }

    Command::Review { source, limit } => {
      let maintainer = Maintainer::new(Arc::clone(&store), &config);
      print_json(&maintainer.review_queue(source.as_deref(), Some(limit)).await?)?;
    }

    Command::Approve { entry, region } => {
      let maintainer = Maintainer::new(Arc::clone(&store), &config);
      let outcome = maintainer.approve(entry, RegionId(region)).await?;
      println!("{outcome:?}");
    }

    Command::Alias { command: AliasCommand::Add { region, raw_name, source, variant, primary } } => {
      let outcome = dictionary
        .add_alias(NewAlias {
          region_id: RegionId(region),
          raw_name,
          source_system: source,
          variant,
          is_primary: primary,
        })
        .await?;
      println!("{outcome:?}");
    }

    Command::Region { command } => region(&store, &dictionary, command).await?,

    Command::Seed { file } => {
      let json = std::fs::read_to_string(&file)
        .with_context(|| format!("reading seed document {}", file.display()))?;
      let document = SeedDocument::from_json(&json)?;
      print_json(&seed(Arc::clone(&store), &dictionary, document).await?)?;
    }

    Command::Serve { bind } => {
      let app = axum::Router::new()
        .nest("/api", atlas_api::api_router(Arc::clone(&store), config.auditor.weights))
        .layer(TraceLayer::new_for_http());

      tracing::info!("Listening on http://{bind}");
      let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
      axum::serve(listener, app).await.context("server error")?;
    }
  }
  Ok(ExitCode::SUCCESS)
}

async fn region(
  store: &Arc<SqliteStore>,
  dictionary: &Dictionary<SqliteStore>,
  command: RegionCommand,
) -> anyhow::Result<()> {
  match command {
    RegionCommand::Add { name, kind, code, parent } => {
      let mut new = NewRegion::new(name, kind);
      new.code = code;
      new.parent_id = parent.map(RegionId);
      let (region, created) = dictionary.add_region(new).await?;
      if !created {
        tracing::info!(region_id = %region.region_id, "region already exists");
      }
      print_json(&region)
    }
    RegionCommand::SetParent { region, parent } => {
      print_json(&dictionary.set_parent(RegionId(region), parent.map(RegionId)).await?)
    }
    RegionCommand::Retire { region } => print_json(&dictionary.retire(RegionId(region)).await?),
    RegionCommand::List { kind, retired } => print_json(&store.list_regions(kind, retired).await?),
  }
}

/// A job context cancelled on Ctrl-C. Jobs stop at the next chunk boundary
/// and close their ledger entry.
fn job_context(job: &str) -> JobContext {
  let ctx = JobContext::new(job);
  let handle = ctx.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      tracing::warn!("interrupt received; stopping after the current chunk");
      handle.cancel();
    }
  });
  ctx
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
