//! # CLI Command Implementations
//!
//! Every command resolves a `StoreConfig` the same way: the `--config`
//! file (or defaults), then `AUDITDB_*` environment overrides, then the
//! command-line flags.

use auditdb_core::config::filename_for_audit;
use auditdb_core::{
    AuditError, AuditScope, AuditStore, DataKey, DataType, Identity, LogQuery, Properties,
    Record, StorageTarget, StoreConfig,
};
use std::path::{Path, PathBuf};

/// Where the database comes from, as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Target {
    pub database: Option<String>,
    pub audit_name: Option<String>,
    pub config: Option<PathBuf>,
}

impl Target {
    /// Layer file, environment and flags into one configuration.
    pub fn resolve(&self) -> Result<StoreConfig, AuditError> {
        let base = match &self.config {
            Some(path) => StoreConfig::from_file(path)?,
            None => StoreConfig::new(),
        };
        let mut config = base.with_env_overrides();
        if let Some(url) = &self.database {
            config = config.with_audit_db(url.clone());
        }
        if let Some(name) = &self.audit_name {
            config = config.with_audit_name(name.clone());
        }
        Ok(config)
    }

    /// Connection URL of an existing database.
    fn existing_url(&self, config: &StoreConfig) -> Result<String, AuditError> {
        let url = match (&config.audit_db, &config.audit_name) {
            (Some(url), _) => url.clone(),
            (None, Some(name)) => filename_for_audit(name).display().to_string(),
            (None, None) => {
                return Err(AuditError::Validation(
                    "No database given: use --database or --audit-name".to_string(),
                ));
            }
        };
        if let StorageTarget::File(path) = StorageTarget::parse(&url)? {
            if !path.exists() {
                return Err(AuditError::NotFound(format!(
                    "No audit database at {}",
                    path.display()
                )));
            }
        }
        Ok(url)
    }

    /// Open a database that must already exist.
    pub fn open_existing(&self) -> Result<AuditStore, AuditError> {
        let config = self.resolve()?;
        let url = self.existing_url(&config)?;
        AuditStore::open(config.with_audit_db(url))
    }
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Create (or reopen) an audit database with the given scope.
pub fn cmd_init(
    target: &Target,
    json: bool,
    domains: Vec<String>,
    addresses: Vec<String>,
    roots: Vec<String>,
) -> Result<(), AuditError> {
    let mut config = target.resolve()?;
    let scope = AuditScope {
        addresses: addresses.into_iter().collect(),
        domains: domains.into_iter().collect(),
        roots: roots.into_iter().collect(),
    };
    if !scope.is_empty() {
        config = config.with_scope(scope);
    }

    let store = AuditStore::open(config)?;
    tracing::info!(audit = %store.audit_name(), url = %store.connection_url(), "audit database ready");

    if json {
        print_json(&serde_json::json!({
            "audit_name": store.audit_name(),
            "database": store.connection_url(),
        }));
    } else {
        println!("Audit:    {}", store.audit_name());
        println!("Database: {}", store.connection_url());
    }
    store.close()
}

// =============================================================================
// INFO COMMAND
// =============================================================================

/// Show the audit header and table counts.
pub fn cmd_info(target: &Target, json: bool) -> Result<(), AuditError> {
    let store = target.open_existing()?;
    let (start, stop) = store.audit_times()?;
    let scope = store.audit_scope()?;

    let mut counts = Vec::with_capacity(DataType::ALL.len());
    for data_type in DataType::ALL {
        counts.push((data_type, store.count(Some(data_type), None)?));
    }
    let total = store.count(None, None)?;

    if json {
        let families: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(t, n)| (t.name().to_string(), serde_json::json!(n)))
            .collect();
        print_json(&serde_json::json!({
            "audit_name": store.audit_name(),
            "database": store.connection_url(),
            "start_time": start,
            "stop_time": stop,
            "scope": scope,
            "entities": total,
            "families": families,
        }));
        return Ok(());
    }

    let show = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map_or_else(|| "-".to_string(), |t| t.to_rfc3339())
    };
    println!("Audit Database");
    println!("==============");
    println!("Audit:    {}", store.audit_name());
    println!("Database: {}", store.connection_url());
    println!("Started:  {}", show(start));
    println!("Stopped:  {}", show(stop));
    println!();
    println!("Entities: {}", total);
    for (data_type, count) in &counts {
        println!("  {:<14} {}", data_type.name(), count);
    }
    if !scope.is_empty() {
        println!();
        println!("Scope:");
        for domain in &scope.domains {
            println!("  domain  {}", domain);
        }
        for address in &scope.addresses {
            println!("  address {}", address);
        }
        for root in &scope.roots {
            println!("  root    {}", root);
        }
    }
    Ok(())
}

// =============================================================================
// DATA COMMANDS
// =============================================================================

/// List entity identities.
pub fn cmd_keys(
    target: &Target,
    json: bool,
    data_type: Option<&str>,
    subtype: Option<&str>,
) -> Result<(), AuditError> {
    let data_type = data_type.map(str::parse::<DataType>).transpose()?;
    let store = target.open_existing()?;
    let keys = store.keys(data_type, subtype)?;

    if json {
        print_json(&serde_json::json!(keys));
    } else {
        for key in &keys {
            println!("{}", key);
        }
    }
    Ok(())
}

/// Show one entity or relationship.
pub fn cmd_get(target: &Target, json: bool, key: &str) -> Result<(), AuditError> {
    let key: DataKey = key.parse()?;
    let store = target.open_existing()?;
    let record = store
        .get::<Properties>(&key)?
        .ok_or_else(|| AuditError::NotFound(format!("No data for key {}", key)))?;

    if json {
        print_json(&serde_json::json!(record));
        return Ok(());
    }

    match record {
        Record::Entity(entity) => {
            println!("{} ({})", entity.identity, entity.subtype);
            for (name, value) in entity.payload.iter() {
                println!("  {} = {}", name, value);
            }
            if !entity.links.is_empty() {
                println!("  links:");
                for link in &entity.links {
                    println!("    {}", link);
                }
            }
        }
        Record::Relationship(rel) => {
            println!(
                "{} ({}) <-> {} ({})",
                rel.left.identity, rel.left.subtype, rel.right.identity, rel.right.subtype
            );
        }
    }
    Ok(())
}

/// List keys that have not finished `stage`.
pub fn cmd_pending(target: &Target, json: bool, stage: u32) -> Result<(), AuditError> {
    let store = target.open_existing()?;
    let pending = store.pending_below(stage)?;

    if json {
        let keys: Vec<String> = pending.iter().map(ToString::to_string).collect();
        print_json(&serde_json::json!({ "stage": stage, "pending": keys }));
    } else {
        println!("{} key(s) below stage {}", pending.len(), stage);
        for key in &pending {
            println!("  {}", key);
        }
    }
    Ok(())
}

/// Show which plugins processed an entity.
pub fn cmd_history(target: &Target, json: bool, identity: &str) -> Result<(), AuditError> {
    let identity = Identity::new(identity)?;
    let store = target.open_existing()?;
    let plugins = store.past_plugins(&identity)?;

    if json {
        print_json(&serde_json::json!({ "identity": identity, "plugins": plugins }));
    } else {
        for plugin in &plugins {
            println!("{}", plugin);
        }
    }
    Ok(())
}

// =============================================================================
// LOG COMMAND
// =============================================================================

/// Query the audit log.
pub fn cmd_log(
    target: &Target,
    json: bool,
    plugin: Option<String>,
    identity: Option<String>,
    page: Option<usize>,
    per_page: Option<usize>,
) -> Result<(), AuditError> {
    let mut query = LogQuery::new();
    if let Some(plugin) = plugin {
        query = query.plugin(plugin);
    }
    if let Some(identity) = identity {
        query = query.identity(Identity::new(identity)?);
    }
    if let Some(per_page) = per_page {
        query = query.page(page.unwrap_or(1), per_page);
    }

    let store = target.open_existing()?;
    let lines = store.query_log(&query)?;

    if json {
        print_json(&serde_json::json!(lines));
        return Ok(());
    }
    for line in &lines {
        println!(
            "{} [{}]{} {}",
            line.timestamp.to_rfc3339(),
            line.plugin.as_deref().unwrap_or("core"),
            if line.is_error { " ERROR" } else { "" },
            line.text
        );
    }
    Ok(())
}

// =============================================================================
// MAINTENANCE COMMANDS
// =============================================================================

/// Write a JSON snapshot of every table.
pub fn cmd_dump(target: &Target, output: &Path) -> Result<(), AuditError> {
    let store = target.open_existing()?;
    store.dump(output)?;
    println!("Dumped {} to {}", store.audit_name(), output.display());
    Ok(())
}

/// Compact the database file.
pub fn cmd_compact(target: &Target) -> Result<(), AuditError> {
    let mut store = target.open_existing()?;
    store.compact()?;
    println!("Compacted {}", store.connection_url());
    Ok(())
}

/// Print the configuration stored in a database, without opening it.
pub fn cmd_config(target: &Target, json: bool) -> Result<(), AuditError> {
    let config = target.resolve()?;
    let url = target.existing_url(&config)?;
    let stored = AuditStore::read_config(&url, config.audit_name.as_deref())?;

    if json {
        print_json(&serde_json::json!(stored));
    } else {
        print!("{}", stored.to_toml_string()?);
    }
    Ok(())
}
