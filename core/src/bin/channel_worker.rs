//! channel-worker
//!
//! External worker process. Attaches to the segment named by its launch
//! arguments, runs its share of the job and exits.
//!
//! Usage: channel-worker <mode> <segmentKey> <segmentSize> <filePath|-> <slotIndex> <workerCount> <engineSequence|->

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use channel_core::config::ChannelConfig;
use channel_core::constants::{SHM_DIR_ENV, SHM_PREFIX_ENV, WORKER_KEY_ENV};
use channel_core::shm::SegmentNamespace;
use channel_core::worker::{
    BlockTransform, KeystreamXor, Passthrough, WorkerInvocation, WorkerRuntime, WorkerSource,
};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "channel_core=info,channel_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn namespace_from_env(defaults: &ChannelConfig) -> SegmentNamespace {
    let dir = env::var_os(SHM_DIR_ENV).map(PathBuf::from).unwrap_or_else(|| defaults.shm_dir.clone());
    let prefix = env::var(SHM_PREFIX_ENV).unwrap_or_else(|_| defaults.shm_prefix.clone());
    SegmentNamespace::new(dir, prefix)
}

fn transform_from_env() -> anyhow::Result<Arc<dyn BlockTransform>> {
    match env::var(WORKER_KEY_ENV) {
        Ok(hex) => Ok(Arc::new(KeystreamXor::from_hex(&hex).context("reading worker key")?)),
        Err(_) => Ok(Arc::new(Passthrough)),
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let invocation = WorkerInvocation::from_args(env::args_os().skip(1)).context("parsing launch arguments")?;
    let defaults = ChannelConfig::default();
    let namespace = namespace_from_env(&defaults);
    let transform = transform_from_env()?;

    let runtime = WorkerRuntime::attach(&namespace, &invocation, defaults.done_policy())
        .with_context(|| format!("attaching to segment {:#010x}", invocation.segment_key))?;

    let source = invocation.file_path.clone().map(WorkerSource::File);
    let report = runtime.run(source, transform.as_ref())?;

    tracing::info!(
        slot = invocation.slot_index,
        blocks = report.blocks,
        bytes = report.bytes,
        stopped_early = report.stopped_early,
        "worker exiting"
    );
    Ok(())
}
