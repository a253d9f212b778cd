use std::path::PathBuf;

use simstore_core::{Backend, CutoffTable, PartitionKind, Result, StoreConfig};

/// Command-line overrides applied on top of the environment.
#[derive(Debug, Clone, Default)]
pub struct AdminOverrides {
    pub root: Option<PathBuf>,
    pub cutoffs: Option<String>,
    pub backend: Option<Backend>,
    pub partition: Option<PartitionKind>,
    pub workers: Option<usize>,
}

/// Store configuration: `SIMSTORE_*` environment variables, then flags.
pub fn load_store_config(overrides: &AdminOverrides) -> Result<StoreConfig> {
    let mut config = StoreConfig::from_env();
    apply_overrides(&mut config, overrides)?;
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut StoreConfig, overrides: &AdminOverrides) -> Result<()> {
    if let Some(root) = &overrides.root {
        config.root = root.clone();
    }
    if let Some(list) = &overrides.cutoffs {
        config.cutoffs = CutoffTable::parse(list)?;
    }
    if let Some(backend) = overrides.backend {
        config.backend = backend;
    }
    if let Some(kind) = overrides.partition {
        config.partition_kind = kind;
    }
    if let Some(workers) = overrides.workers {
        config.maintenance_workers = workers;
    }
    Ok(())
}
