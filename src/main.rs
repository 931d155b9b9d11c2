//! appinstance CLI entrypoint.
//!
//! This is the main entrypoint for the appinstance command-line tool.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use appinstance_operator::cli::{Cli, Commands, LogFormat, OutputFormatter};
use appinstance_operator::config::{
    ClusterBackend, ConfigParser, ConfigValidator, DEFAULT_CONFIG_FILES, OperatorConfig,
};
use appinstance_operator::controller::{Controller, spawn_resync};
use appinstance_operator::error::{ConfigError, Result, StoreError};
use appinstance_operator::kube::{KubeClient, KubeCluster};
use appinstance_operator::model::{INSTANCE_KIND, ObjectKey};
use appinstance_operator::reconciler::Reconciler;
use appinstance_operator::store::{
    Cluster, InstanceAdmin, InstanceLister, InstanceStore, LEASE_DURATION_SECS, LocalCluster,
    STORE_DIR, UnitStore, generate_holder_id,
};

use clap::Parser;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Capacity of the trigger channel feeding the work queue.
const TRIGGER_CHANNEL_CAPACITY: usize = 256;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_format);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` is honoured unless `--verbose` asks for debug output.
fn init_logging(verbose: bool, format: LogFormat) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force, &formatter),
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, &formatter),
        Commands::Run { namespace, workers } => cmd_run(config_path, namespace, workers).await,
        Commands::Reconcile { instance } => cmd_reconcile(config_path, &instance, &formatter).await,
        Commands::Plan { instance } => cmd_plan(config_path, &instance, &formatter).await,
        Commands::Status {
            instance,
            namespace,
        } => cmd_status(config_path, instance.as_ref(), namespace.as_deref(), &formatter).await,
        Commands::Apply {
            instance,
            size,
            reconcile,
        } => cmd_apply(config_path, &instance, size, reconcile, &formatter).await,
        Commands::Delete { instance } => cmd_delete(config_path, &instance, &formatter).await,
        Commands::Units { instance } => cmd_units(config_path, &instance, &formatter).await,
    }
}

/// Writes a starter configuration file.
fn cmd_init(path: &Path, force: bool, formatter: &OutputFormatter) -> Result<()> {
    info!("Initializing configuration in: {}", path.display());

    let config_path = path.join(DEFAULT_CONFIG_FILES[0]);
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        emit(&formatter.warning(&format!(
            "Configuration file already exists: {} (use --force to overwrite)",
            config_path.display()
        )))?;
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    let defaults = serde_yaml::to_string(&OperatorConfig::default()).map_err(|e| {
        ConfigError::ParseError {
            message: format!("Failed to render default configuration: {e}"),
            location: None,
        }
    })?;
    std::fs::write(
        &config_path,
        format!("# appinstance operator configuration\n{defaults}"),
    )?;
    emit(&formatter.success(&format!("Created: {}", config_path.display())))?;

    let ignore_line = format!("{STORE_DIR}/");
    let existing = std::fs::read_to_string(&gitignore_path).unwrap_or_default();
    if !existing.lines().any(|l| l.trim() == ignore_line) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&gitignore_path)?;
        writeln!(file, "{ignore_line}")?;
        debug!("Added {ignore_line} to {}", gitignore_path.display());
    }

    Ok(())
}

/// Validates the configuration.
fn cmd_validate(
    config_path: Option<&Path>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let parser = parser_for(config_path);
    parser.load_dotenv()?;
    let config = parser.load(config_path)?;

    let result = ConfigValidator::new().check(&config);
    emit(&formatter.format_validation(&result, show_warnings))?;

    if result.is_valid() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            message: format!("{} error(s) found", result.error_count()),
            field: None,
        }
        .into())
    }
}

/// Runs the controller until interrupted.
async fn cmd_run(
    config_path: Option<&Path>,
    namespace: Option<String>,
    workers: Option<usize>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if namespace.is_some() {
        config.controller.namespace = namespace;
    }
    if let Some(workers) = workers {
        config.controller.workers = workers;
    }
    ConfigValidator::new().validate(&config)?;

    match config.cluster.backend {
        ClusterBackend::Local => run_local(&config).await,
        ClusterBackend::Kube => {
            let cluster = kube_cluster(&config)?;
            run_controller(cluster, &config, interrupted()).await;
            Ok(())
        }
    }
}

/// Runs the controller against the local store while holding its lease.
async fn run_local(config: &OperatorConfig) -> Result<()> {
    let local = Arc::new(local_cluster(config)?);
    let lease_file = local.lease_file().clone();
    let lease = Arc::new(Mutex::new(lease_file.acquire(&generate_holder_id()).await?));

    let (lost_tx, lost_rx) = oneshot::channel::<()>();
    let renewer = {
        let lease = Arc::clone(&lease);
        let lease_file = lease_file.clone();
        let period = Duration::from_secs(u64::try_from(LEASE_DURATION_SECS / 3).unwrap_or(20));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = lease_file.renew(&mut *lease.lock().await).await {
                    error!("Lost the store lease: {e}");
                    let _ = lost_tx.send(());
                    return;
                }
            }
        })
    };

    let shutdown = async {
        tokio::select! {
            () = interrupted() => {}
            _ = lost_rx => {}
        }
    };
    run_controller(local, config, shutdown).await;

    renewer.abort();
    let lease = lease.lock().await;
    lease_file.release(&lease).await
}

/// Wires the controller to a cluster and runs it until `shutdown` resolves.
async fn run_controller<C, F>(cluster: Arc<C>, config: &OperatorConfig, shutdown: F)
where
    C: Cluster + ?Sized + 'static,
    F: Future<Output = ()>,
{
    info!("Running against the {} backend", cluster.backend_type());

    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&cluster),
        Arc::clone(&cluster),
        config.unit.clone(),
    ));
    let controller = Controller::new(reconciler, &config.controller);

    let (tx, rx) = mpsc::channel(TRIGGER_CHANNEL_CAPACITY);
    let resync = spawn_resync(
        cluster,
        config.controller.namespace.clone(),
        Duration::from_secs(config.controller.resync_interval_secs),
        tx,
    );

    controller.run(rx, shutdown).await;
    resync.abort();
}

/// Resolves once the process is asked to stop.
async fn interrupted() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received interrupt"),
        Err(e) => {
            warn!("Cannot listen for interrupts: {e}");
            std::future::pending::<()>().await;
        }
    }
}

/// Runs one reconciliation pass.
async fn cmd_reconcile(
    config_path: Option<&Path>,
    key: &ObjectKey,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_config(config_path)?;
    let cluster = connect(&config)?;
    let reconciler = Reconciler::new(Arc::clone(&cluster), cluster, config.unit);

    let outcome = reconciler.reconcile(key).await?;
    emit(&formatter.format_outcome(&outcome))
}

/// Shows what a pass would do.
async fn cmd_plan(config_path: Option<&Path>, key: &ObjectKey, formatter: &OutputFormatter) -> Result<()> {
    let config = load_config(config_path)?;
    let cluster = connect(&config)?;
    let reconciler = Reconciler::new(Arc::clone(&cluster), cluster, config.unit);

    let report = reconciler
        .plan(key)
        .await?
        .ok_or_else(|| StoreError::not_found(INSTANCE_KIND, key))?;
    emit(&formatter.format_plan(&report))
}

/// Shows instances with their status.
async fn cmd_status(
    config_path: Option<&Path>,
    key: Option<&ObjectKey>,
    namespace: Option<&str>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_config(config_path)?;
    let cluster = connect(&config)?;

    let keys = match key {
        Some(key) => vec![key.clone()],
        None => {
            let namespace = namespace.or(config.controller.namespace.as_deref());
            cluster.list_keys(namespace).await?
        }
    };

    let mut instances = Vec::with_capacity(keys.len());
    for key in &keys {
        match cluster.get(key).await? {
            Some(instance) => instances.push(instance),
            None if keys.len() == 1 => return Err(StoreError::not_found(INSTANCE_KIND, key).into()),
            None => debug!("{key} disappeared while listing"),
        }
    }

    emit(&formatter.format_instances(&instances))
}

/// Creates or resizes an instance.
async fn cmd_apply(
    config_path: Option<&Path>,
    key: &ObjectKey,
    size: u32,
    reconcile: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_config(config_path)?;
    let cluster = connect(&config)?;

    let instance = cluster.apply_instance(key, size).await?;
    emit(&formatter.success(&format!("{key} wants {} units", instance.desired_size())))?;

    if reconcile {
        let reconciler = Reconciler::new(Arc::clone(&cluster), cluster, config.unit);
        let outcome = reconciler.reconcile(key).await?;
        emit(&formatter.format_outcome(&outcome))?;
    }

    Ok(())
}

/// Deletes an instance.
async fn cmd_delete(config_path: Option<&Path>, key: &ObjectKey, formatter: &OutputFormatter) -> Result<()> {
    let config = load_config(config_path)?;
    let cluster = connect(&config)?;

    if cluster.delete_instance(key).await? {
        emit(&formatter.success(&format!(
            "Deleted {key}; its units are garbage collected"
        )))
    } else {
        emit(&formatter.warning(&format!("{key} does not exist")))
    }
}

/// Lists the units of an instance.
async fn cmd_units(config_path: Option<&Path>, key: &ObjectKey, formatter: &OutputFormatter) -> Result<()> {
    let config = load_config(config_path)?;
    let cluster = connect(&config)?;

    let units = cluster.list(key).await?;
    emit(&formatter.format_units(key, &units))
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Writes command output to stdout.
fn emit(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

/// Creates a parser resolving `.env` next to the configuration file.
fn parser_for(config_path: Option<&Path>) -> ConfigParser {
    match config_path.and_then(Path::parent) {
        Some(dir) if !dir.as_os_str().is_empty() => ConfigParser::new().with_base_path(dir),
        _ => ConfigParser::new(),
    }
}

/// Loads and validates the configuration.
fn load_config(config_path: Option<&Path>) -> Result<OperatorConfig> {
    let parser = parser_for(config_path);
    parser.load_dotenv()?;

    let config = parser.load(config_path)?;
    let result = ConfigValidator::new().validate(&config)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }

    Ok(config)
}

/// Opens the configured cluster backend.
fn connect(config: &OperatorConfig) -> Result<Arc<dyn Cluster>> {
    let cluster: Arc<dyn Cluster> = match config.cluster.backend {
        ClusterBackend::Local => Arc::new(local_cluster(config)?),
        ClusterBackend::Kube => kube_cluster(config)?,
    };
    debug!("Connected to the {} backend", cluster.backend_type());
    Ok(cluster)
}

fn local_cluster(config: &OperatorConfig) -> Result<LocalCluster> {
    config
        .cluster
        .state_path
        .as_ref()
        .map_or_else(LocalCluster::new, |path| Ok(LocalCluster::with_path(path)))
}

fn kube_cluster(config: &OperatorConfig) -> Result<Arc<dyn Cluster>> {
    let client = KubeClient::from_config(&config.cluster)?;
    info!("Using API server {}", client.base_url());
    Ok(Arc::new(KubeCluster::new(client, config.resource.clone())))
}
