//! Manager construction from configuration.

use std::sync::Arc;

use cicada_cic::{
    CheckpointInfo, FaultToleranceManager, FtManagerCic, HalfFtManagerCic, ManagerSettings, Owner,
    ServerResolver, Servers, Transport,
};
use cicada_config::{FtConfig, ProtocolKind};
use cicada_types::{EntityId, Incarnation};

use crate::error::{CicadaError, Result};

/// Initializes logging with a `fmt` subscriber filtered by `RUST_LOG`, at
/// `info` level or above.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .try_init()
        .is_ok()
}

pub fn settings_from_config(config: &FtConfig) -> ManagerSettings {
    ManagerSettings {
        ttc: config.ttc(),
        resend_backoff: config.resend_backoff(),
        output_commit: config.output_commit.enabled,
        output_commit_methods: config.output_commit.methods.clone(),
    }
}

/// Validates `config` and resolves the servers it names.
fn prepare(config: &FtConfig, resolver: &dyn ServerResolver) -> Result<Servers> {
    config.validate()?;
    match config.protocol_kind()? {
        ProtocolKind::Cic => {}
        ProtocolKind::Pml => return Err(CicadaError::UnsupportedProtocol(config.protocol.clone())),
    }
    let urls = config.server_urls()?;
    tracing::debug!(
        checkpoint = %urls.checkpoint,
        location = %urls.location,
        recovery = %urls.recovery,
        "resolving fault-tolerance servers"
    );
    Ok(Servers::resolve(
        resolver,
        &urls.checkpoint,
        &urls.location,
        &urls.recovery,
    )?)
}

/// Builds and registers the manager of a new fault-tolerant entity.
pub fn build_manager(
    config: &FtConfig,
    owner: Arc<dyn Owner>,
    transport: Arc<dyn Transport>,
    resolver: &dyn ServerResolver,
) -> Result<FtManagerCic> {
    let servers = prepare(config, resolver)?;
    Ok(FtManagerCic::init(
        owner,
        servers,
        transport,
        settings_from_config(config),
    )?)
}

/// Builds the manager of an entity restored from a checkpoint and restarts
/// it in `incarnation`.
pub fn restart_manager(
    config: &FtConfig,
    owner: Arc<dyn Owner>,
    transport: Arc<dyn Transport>,
    resolver: &dyn ServerResolver,
    info: CheckpointInfo,
    incarnation: Incarnation,
) -> Result<FtManagerCic> {
    let servers = prepare(config, resolver)?;
    let manager = FtManagerCic::new(owner, servers, transport, settings_from_config(config));
    manager.before_restart_after_recovery(info, incarnation)?;
    Ok(manager)
}

/// Builds the manager of a caller that is not fault tolerant. Only the
/// location server is needed.
pub fn build_half_manager(
    config: &FtConfig,
    owner_id: EntityId,
    transport: Arc<dyn Transport>,
    resolver: &dyn ServerResolver,
) -> Result<HalfFtManagerCic> {
    let urls = config.server_urls()?;
    let location = resolver.location(&urls.location)?;
    Ok(HalfFtManagerCic::new(owner_id, location, transport)
        .with_resend_backoff(config.resend_backoff()))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cicada_cic::memory::{MemoryCluster, MemoryOwner, MemoryTransport};
    use cicada_cic::FtError;
    use cicada_config::ConfigError;
    use cicada_types::{CheckpointIndex, EndpointRef};

    use super::*;

    fn config() -> FtConfig {
        let mut config = FtConfig::with_global_server("mem://servers");
        config.ttc_secs = 3600;
        config.resend_backoff_ms = 0;
        config
    }

    fn owner(n: u64) -> Arc<MemoryOwner> {
        Arc::new(MemoryOwner::new(EndpointRef::new(
            EntityId::new(n),
            format!("mem://{n}"),
        )))
    }

    #[test]
    fn settings_follow_config() {
        let mut config = config();
        config.output_commit.enabled = true;
        config.output_commit.methods = vec!["audit".to_string()];

        let settings = settings_from_config(&config);
        assert_eq!(settings.ttc, Duration::from_secs(3600));
        assert_eq!(settings.resend_backoff, Duration::ZERO);
        assert!(settings.output_commit);
        assert_eq!(settings.output_commit_methods, vec!["audit".to_string()]);
    }

    #[test]
    fn builds_and_registers_cic_manager() {
        let cluster = MemoryCluster::new();
        let transport = Arc::new(MemoryTransport::default());

        let manager = build_manager(&config(), owner(1), transport, &cluster).unwrap();
        assert_eq!(manager.owner_id(), EntityId::new(1));
        assert!(cluster.recovery.is_registered(EntityId::new(1)));
        assert_eq!(cluster.resolved(), vec!["mem://servers".to_string(); 3]);
    }

    #[test]
    fn dedicated_server_addresses_are_resolved_per_role() {
        let cluster = MemoryCluster::new();
        let transport = Arc::new(MemoryTransport::default());
        let mut config = config();
        config.servers.global = None;
        config.servers.checkpoint = Some("mem://storage".to_string());
        config.servers.location = Some("mem://location".to_string());
        config.servers.recovery = Some("mem://recovery".to_string());

        build_manager(&config, owner(1), transport, &cluster).unwrap();
        assert_eq!(
            cluster.resolved(),
            vec!["mem://storage", "mem://location", "mem://recovery"]
        );
    }

    #[test]
    fn missing_servers_fail_validation() {
        let cluster = MemoryCluster::new();
        let transport = Arc::new(MemoryTransport::default());
        let mut config = config();
        config.servers.global = None;
        config.servers.location = Some("mem://location".to_string());

        let err = build_manager(&config, owner(1), transport, &cluster).unwrap_err();
        assert!(matches!(err, CicadaError::Config(ConfigError::ServersNotSet(_))));
        assert!(cluster.resolved().is_empty());
    }

    #[test]
    fn pml_is_not_available() {
        let cluster = MemoryCluster::new();
        let transport = Arc::new(MemoryTransport::default());
        let mut config = config();
        config.protocol = "pml".to_string();

        let err = build_manager(&config, owner(1), transport, &cluster).unwrap_err();
        assert!(matches!(err, CicadaError::UnsupportedProtocol(p) if p == "pml"));
    }

    #[test]
    fn unreachable_server_fails_build() {
        let cluster = MemoryCluster::new();
        cluster.recovery.set_fail(true);
        let transport = Arc::new(MemoryTransport::default());

        let err = build_manager(&config(), owner(1), transport, &cluster).unwrap_err();
        assert!(matches!(err, CicadaError::Ft(FtError::Transport(_))));
    }

    #[test]
    fn restarted_manager_takes_new_incarnation() {
        let cluster = MemoryCluster::new();
        let transport = Arc::new(MemoryTransport::default());

        let manager = restart_manager(
            &config(),
            owner(1),
            transport,
            &cluster,
            CheckpointInfo::new(CheckpointIndex::new(4)),
            Incarnation::new(3),
        )
        .unwrap();
        let status = manager.status();
        assert_eq!(status.incarnation, Incarnation::new(3));
        assert_eq!(status.checkpoint_index, CheckpointIndex::new(4));
        assert_eq!(status.last_recovery, CheckpointIndex::new(4));
    }

    #[test]
    fn half_manager_only_needs_location() {
        let cluster = MemoryCluster::new();
        let transport = Arc::new(MemoryTransport::default());

        let half = build_half_manager(&config(), EntityId::new(9), transport, &cluster).unwrap();
        assert_eq!(half.owner_id(), EntityId::new(9));
        assert_eq!(cluster.resolved(), vec!["mem://servers".to_string()]);
        assert!(!half.is_a_checkpoint());
    }
}
