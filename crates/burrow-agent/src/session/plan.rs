//! Turning coordinator replies into per-storage session plans

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::PathBuf;

use rand::Rng;

use burrow_core::credentials::generate_credentials;
use burrow_core::{ConfigError, ResolvedConfig};
use burrow_protocol::{Credentials, SessionAction, SessionRequest, SourceAssignment, StorageUnit};

use super::rsyncd::{is_valid_module_name, is_valid_module_path};
use crate::error::SessionError;

/// Ports the transfer daemon and tunnel may use
pub const SESSION_PORTS: RangeInclusive<u16> = 49152..=65535;

/// Pick a session port at random
pub fn random_port() -> u16 {
    rand::thread_rng().gen_range(SESSION_PORTS)
}

/// A source exposed read-only for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedSource {
    pub path: PathBuf,
    pub credentials: Credentials,
}

/// The writable module exposed in restore mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreTarget {
    pub module: String,
    pub path: PathBuf,
    pub credentials: Credentials,
}

/// Everything needed to run one session against one storage unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPlan {
    pub action: SessionAction,
    pub storage: StorageUnit,
    /// Local daemon port, forwarded to the same port on the storage side
    pub port: u16,
    pub sources: BTreeMap<String, PlannedSource>,
    pub restore: Option<RestoreTarget>,
    pub verbose: bool,
}

impl SessionPlan {
    /// Descriptor sent to the storage unit
    ///
    /// Restore credentials stay local: the operator hands them to the
    /// storage side by hand.
    pub fn request(&self) -> SessionRequest {
        SessionRequest {
            action: self.action,
            port: self.port,
            sources: self
                .sources
                .iter()
                .map(|(name, source)| (name.clone(), source.credentials.clone()))
                .collect(),
            verbose: self.verbose,
        }
    }
}

/// Local sources that a reply assigns to a storage unit, grouped by unit
///
/// Names unknown to local configuration and entries without storage are
/// dropped. The first storage description seen for a unit name is kept.
pub fn group_by_storage(
    config: &ResolvedConfig,
    assignments: &BTreeMap<String, SourceAssignment>,
) -> BTreeMap<String, (StorageUnit, Vec<String>)> {
    let mut groups: BTreeMap<String, (StorageUnit, Vec<String>)> = BTreeMap::new();
    for (name, assignment) in assignments {
        if !config.sources.contains_key(name) {
            tracing::debug!("Coordinator mentioned unknown source {:?}, ignoring", name);
            continue;
        }
        let Some(storage) = &assignment.storage else {
            tracing::debug!("Source {:?} has no storage assigned", name);
            continue;
        };
        groups
            .entry(storage.name.clone())
            .or_insert_with(|| (storage.clone(), Vec::new()))
            .1
            .push(name.clone());
    }
    groups
}

/// One checkin session per storage unit with scheduled local sources
///
/// Sources whose name or path cannot be written into the transfer daemon
/// configuration are left out, and a storage unit left with no sources
/// gets no session.
pub fn checkin_plans(
    config: &ResolvedConfig,
    scheduled: &BTreeMap<String, SourceAssignment>,
    verbose: bool,
) -> Vec<SessionPlan> {
    group_by_storage(config, scheduled)
        .into_values()
        .filter_map(|(storage, names)| {
            let sources: BTreeMap<String, PlannedSource> = names
                .into_iter()
                .filter_map(|name| {
                    let source = config.sources.get(&name)?;
                    if !is_valid_module_name(&name) || !is_valid_module_path(&source.path) {
                        tracing::warn!(
                            "Source {:?} ({:?}) cannot be exposed by the transfer daemon, skipping",
                            name,
                            source.path
                        );
                        return None;
                    }
                    let credentials = source.credentials().unwrap_or_else(|| {
                        tracing::warn!(
                            "Source {:?} has no stored credentials, using one-time credentials",
                            name
                        );
                        generate_credentials()
                    });
                    Some((
                        name,
                        PlannedSource {
                            path: source.path.clone(),
                            credentials,
                        },
                    ))
                })
                .collect();
            if sources.is_empty() {
                return None;
            }

            Some(SessionPlan {
                action: SessionAction::Checkin,
                storage,
                port: random_port(),
                sources,
                restore: None,
                verbose,
            })
        })
        .collect()
}

/// Choose the storage unit to restore from
///
/// A requested name must match one of the discovered units. Without one,
/// exactly one unit must exist.
pub fn select_restore_storage(
    mut groups: BTreeMap<String, (StorageUnit, Vec<String>)>,
    requested: Option<&str>,
) -> Result<StorageUnit, SessionError> {
    if groups.is_empty() {
        return Err(SessionError::NoStorage);
    }

    let available: Vec<String> = groups.keys().cloned().collect();
    match requested {
        Some(name) => groups
            .remove(name)
            .map(|(storage, _)| storage)
            .ok_or_else(|| SessionError::UnknownStorage {
                requested: name.to_string(),
                available,
            }),
        None if groups.len() == 1 => groups
            .into_values()
            .next()
            .map(|(storage, _)| storage)
            .ok_or(SessionError::NoStorage),
        None => Err(SessionError::AmbiguousStorage(available)),
    }
}

/// The restore session, with one-time credentials for the restore module
pub fn restore_plan(
    config: &ResolvedConfig,
    holdings: &BTreeMap<String, SourceAssignment>,
    requested: Option<&str>,
) -> Result<SessionPlan, SessionError> {
    if !is_valid_module_name(&config.restore_module) {
        return Err(ConfigError::Invalid(format!(
            "restore_module {:?} is not a usable module name",
            config.restore_module
        ))
        .into());
    }
    if !is_valid_module_path(&config.restore_path) {
        return Err(ConfigError::Invalid(format!(
            "restore_path {:?} is not a usable module path",
            config.restore_path
        ))
        .into());
    }
    let storage = select_restore_storage(group_by_storage(config, holdings), requested)?;

    Ok(SessionPlan {
        action: SessionAction::Restore,
        storage,
        port: random_port(),
        sources: BTreeMap::new(),
        restore: Some(RestoreTarget {
            module: config.restore_module.clone(),
            path: config.restore_path.clone(),
            credentials: generate_credentials(),
        }),
        verbose: true,
    })
}
