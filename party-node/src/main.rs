// Watch-party node: runs an in-process demo party or a title search.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use party_core::{QueueCandidate, Vote};
use party_node::config;
use party_node::media::Dimensions;
use party_node::synthetic::{SyntheticCapture, SyntheticSurfaceFactory};
use party_node::{LoopbackRendezvous, MovieSearch, Party, Snapshot};
use tokio::sync::watch;
use tracing::info;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SETTLE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = config::load();
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("--version") | Some("-V") => {
            println!("watchparty {}", VERSION);
            Ok(())
        }
        Some("search") => {
            let query = args.collect::<Vec<_>>().join(" ");
            run_search(&cfg, &query).await
        }
        Some("demo") | None => run_demo(&cfg).await,
        Some(other) => anyhow::bail!("unknown command {:?}; expected `demo` or `search <title>`", other),
    }
}

async fn run_search(cfg: &config::Config, query: &str) -> anyhow::Result<()> {
    let search = MovieSearch::new(cfg.search()).context("building search client")?;
    let results = search.search(query).await.context("title search")?;
    for c in results {
        match c.year {
            Some(year) => println!("{:>8}  {} ({})", c.tmdb_id, c.title, year),
            None => println!("{:>8}  {}", c.tmdb_id, c.title),
        }
    }
    Ok(())
}

/// Host and guest in one process over the loopback rendezvous with synthetic media.
async fn run_demo(cfg: &config::Config) -> anyhow::Result<()> {
    let rendezvous = Arc::new(LoopbackRendezvous::new());
    let host = Party::new(
        cfg,
        rendezvous.clone(),
        Arc::new(SyntheticCapture::new(Dimensions::new(2560, 1440)).with_audio()),
        Arc::new(SyntheticSurfaceFactory::default()),
    );
    let guest = Party::new(
        cfg,
        rendezvous,
        Arc::new(SyntheticCapture::unsupported()),
        Arc::new(SyntheticSurfaceFactory::default()),
    );

    let code = host.create_party().await?;
    guest.join_party(&code.as_str().to_lowercase()).await?;
    wait_for(guest.subscribe(), |s| s.remote_stream.is_some()).await?;

    guest.send_message("popcorn ready").await?;
    guest
        .add_to_queue(QueueCandidate {
            tmdb_id: 550,
            media_type: party_core::MediaType::Movie,
            title: "Fight Club".into(),
            poster: None,
            year: Some(1999),
        })
        .await?;
    let snap = wait_for(host.subscribe(), |s| !s.queue.is_empty()).await?;
    let item = snap.queue[0].id;
    host.vote_on_queue(item, Vote::Up).await?;
    guest.vote_on_queue(item, Vote::Up).await?;
    let snap = wait_for(host.subscribe(), |s| {
        s.queue.first().map(|i| i.score()) == Some(2)
    })
    .await?;

    info!(
        room = %code,
        guests = snap.participants.len(),
        messages = snap.messages.len(),
        top = %snap.queue[0].title,
        score = snap.queue[0].score(),
        "demo party running"
    );

    host.leave_party().await;
    let ended = wait_for(guest.subscribe(), |s| s.error.is_some()).await?;
    if let Some(err) = ended.error {
        info!(message = %err.user_message(), "guest saw the party end");
    }
    guest.leave_party().await;
    Ok(())
}

async fn wait_for<F>(mut rx: watch::Receiver<Snapshot>, pred: F) -> anyhow::Result<Snapshot>
where
    F: FnMut(&Snapshot) -> bool,
{
    let snap = tokio::time::timeout(SETTLE, rx.wait_for(pred))
        .await
        .context("timed out waiting for party state")?
        .context("party dropped")?
        .clone();
    Ok(snap)
}
