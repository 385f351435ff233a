//! The workspace store.

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use brig_types::{PackageKey, PackageName, PackageState, Version, VersionConstraint};
use log::warn;
use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    AvailablePackage, CertificateRecord, ConfigurationInfo, ConfigurationLink,
    ConfigurationType, Error, Repository, RepositoryFragment, SelectedPackage,
    lock::StoreLock,
    schema::{create_schema, migrate},
};

/// The store directory inside a workspace root.
const STORE_DIR: &str = ".brig";

/// The database file name inside the store directory.
const DB_FILE: &str = "brig.sqlite3";

/// The scratch directory name inside the store directory.
const TMP_DIR: &str = "tmp";

/// The environment variable naming the workspace roots currently open
/// in this process, so that nested tool invocations observe the
/// consistent view.
pub const OPEN_CONFIGURATIONS_VAR: &str = "BRIG_OPEN_CONFIGURATIONS";

/// Options controlling how a workspace cluster is opened.
#[derive(Clone, Debug, Default)]
pub struct OpenOptions {
    /// Keep the per-workspace scratch directories on drop.
    pub keep_tmp: bool,
}

/// One workspace attached to the open cluster.
#[derive(Debug)]
struct Attached {
    /// The workspace identity.
    info: ConfigurationInfo,
    /// The SQL schema name the workspace database is attached under.
    schema: String,
    /// The workspace's link table (self link included).
    links: Vec<ConfigurationLink>,
    /// The lock held on the workspace.
    _lock: StoreLock,
}

/// Restores [`OPEN_CONFIGURATIONS_VAR`] to its previous value on drop.
#[derive(Debug)]
struct EnvGuard {
    previous: Option<String>,
}

impl EnvGuard {
    fn set(roots: &[PathBuf]) -> Self {
        let previous = std::env::var(OPEN_CONFIGURATIONS_VAR).ok();
        let mut value = previous.clone().unwrap_or_default();
        for root in roots {
            if !value.is_empty() {
                value.push(' ');
            }
            value.push_str(&root.display().to_string());
        }
        set_env(OPEN_CONFIGURATIONS_VAR, Some(&value));
        EnvGuard { previous }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        set_env(OPEN_CONFIGURATIONS_VAR, self.previous.as_deref());
    }
}

/// Sets or removes a process environment variable.
///
/// The store is single-threaded by contract (the process holds the
/// cluster exclusively), which is what makes this sound.
#[allow(unsafe_code)]
fn set_env(name: &str, value: Option<&str>) {
    // SAFETY: the resolver and executor are single-threaded; no other
    // thread reads the environment concurrently.
    unsafe {
        match value {
            Some(value) => std::env::set_var(name, value),
            None => std::env::remove_var(name),
        }
    }
}

/// Derives the SQL schema name a linked workspace is attached under.
///
/// The name is deterministic in the workspace's filesystem path.
fn schema_name(path: &Path) -> String {
    let digest = Sha256::digest(path.display().to_string().as_bytes());
    format!("cfg_{}", &hex::encode(digest)[..12])
}

/// An active store transaction.
///
/// Obtained from [`Store::transaction`]; rolls back on drop unless
/// [`commit`][StoreTransaction::commit] is called. Transactions span
/// every workspace attached to the cluster.
#[derive(Debug)]
pub struct StoreTransaction<'a> {
    conn: &'a Connection,
    committed: bool,
}

impl StoreTransaction<'_> {
    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit statement fails.
    pub fn commit(mut self) -> Result<(), Error> {
        self.conn.execute_batch("COMMIT")?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StoreTransaction<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

/// A single-writer, exclusively locked workspace store.
///
/// Opening a workspace also opens, on first access, every transitively
/// explicitly-linked workspace; the union (the *cluster*) forms the
/// universe for package lookups. Each member is attached to one SQLite
/// connection under a schema name deterministically derived from its
/// path.
#[derive(Debug)]
pub struct Store {
    conn: Connection,
    self_uuid: Uuid,
    configurations: BTreeMap<Uuid, Attached>,
    dependent_cache: RefCell<HashMap<(Uuid, PackageName), Vec<PackageKey>>>,
    tmp_dirs: Vec<PathBuf>,
    keep_tmp: bool,
    env: Option<EnvGuard>,
}

impl Store {
    /// Creates a new workspace at `root` and opens it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store directory cannot be created, the
    /// workspace is already in use, or schema creation fails.
    pub fn create(
        root: impl AsRef<Path>,
        config_type: ConfigurationType,
        name: Option<&str>,
    ) -> Result<Self, Error> {
        let root = root.as_ref();
        let store_dir = root.join(STORE_DIR);
        fs::create_dir_all(&store_dir).map_err(|source| Error::IoPath {
            path: store_dir.clone(),
            context: "creating the workspace store directory".to_string(),
            source,
        })?;
        let root = canonical_root(root)?;

        let lock = StoreLock::acquire(&store_dir)?;
        let conn = Connection::open(store_dir.join(DB_FILE))?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        create_schema(&conn, "main")?;

        let uuid = Uuid::new_v4();
        conn.execute(
            "INSERT INTO configuration (id, uuid, name, type, path, expl)
             VALUES (0, ?1, ?2, ?3, ?4, 1)",
            params![
                uuid.to_string(),
                name,
                config_type.to_string(),
                root.display().to_string(),
            ],
        )?;

        drop(lock);
        drop(conn);
        Self::open(&root)
    }

    /// Opens the workspace at `root` and its transitively linked
    /// cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace does not exist, is already in
    /// use, has a schema newer than this tool, or an explicitly linked
    /// workspace is missing.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, Error> {
        Self::open_with(root, OpenOptions::default())
    }

    /// Opens the workspace at `root` with explicit [`OpenOptions`].
    ///
    /// # Errors
    ///
    /// See [`Store::open`].
    pub fn open_with(root: impl AsRef<Path>, options: OpenOptions) -> Result<Self, Error> {
        let root = canonical_root(root.as_ref())?;
        let store_dir = root.join(STORE_DIR);
        let db_path = store_dir.join(DB_FILE);
        if !db_path.is_file() {
            return Err(Error::NotAWorkspace { path: root });
        }

        let lock = StoreLock::acquire(&store_dir)?;
        let conn = Connection::open(&db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        migrate(&conn, "main")?;
        prune_dangling_implicit_links(&conn, "main")?;

        let (self_info, links) = read_configuration(&conn, "main")?;
        let self_uuid = self_info.uuid;

        let mut store = Store {
            conn,
            self_uuid,
            configurations: BTreeMap::new(),
            dependent_cache: RefCell::new(HashMap::new()),
            tmp_dirs: Vec::new(),
            keep_tmp: options.keep_tmp,
            env: None,
        };
        store.configurations.insert(
            self_uuid,
            Attached {
                info: self_info,
                schema: "main".to_string(),
                links: links.clone(),
                _lock: lock,
            },
        );

        // Attach every transitively explicitly-linked workspace.
        let mut queue: Vec<ConfigurationLink> =
            links.into_iter().filter(|l| l.explicit && l.id != 0).collect();
        while let Some(link) = queue.pop() {
            if store.configurations.contains_key(&link.uuid) {
                continue;
            }
            let attached = store.attach(&link.path)?;
            queue.extend(
                attached
                    .iter()
                    .filter(|l| l.explicit && l.id != 0)
                    .cloned(),
            );
        }

        let roots: Vec<PathBuf> = store
            .configurations
            .values()
            .map(|a| a.info.path.clone())
            .collect();
        store.env = Some(EnvGuard::set(&roots));

        for attached in store.configurations.values() {
            let tmp = attached.info.path.join(STORE_DIR).join(TMP_DIR);
            if tmp.exists() {
                let _ = fs::remove_dir_all(&tmp);
            }
            fs::create_dir_all(&tmp).map_err(|source| Error::IoPath {
                path: tmp.clone(),
                context: "creating the workspace scratch directory".to_string(),
                source,
            })?;
            store.tmp_dirs.push(tmp);
        }

        Ok(store)
    }

    /// Attaches the workspace at `root` to the cluster and returns its
    /// link table.
    fn attach(&mut self, root: &Path) -> Result<Vec<ConfigurationLink>, Error> {
        let root = canonical_root(root)?;
        let store_dir = root.join(STORE_DIR);
        let db_path = store_dir.join(DB_FILE);
        if !db_path.is_file() {
            return Err(Error::DanglingExplicitLink { path: root });
        }

        let lock = StoreLock::acquire(&store_dir)?;
        let schema = schema_name(&root);
        self.conn.execute(
            &format!("ATTACH DATABASE ?1 AS {schema}"),
            [db_path.display().to_string()],
        )?;
        migrate(&self.conn, &schema)?;
        prune_dangling_implicit_links(&self.conn, &schema)?;

        let (info, links) = read_configuration(&self.conn, &schema)?;
        self.configurations.insert(
            info.uuid,
            Attached {
                info,
                schema,
                links: links.clone(),
                _lock: lock,
            },
        );
        Ok(links)
    }

    /// Returns the uuid of the workspace the cluster was opened from.
    pub fn self_uuid(&self) -> Uuid {
        self.self_uuid
    }

    /// Returns the identity of a cluster member.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownConfiguration`] if `uuid` is not part of
    /// the cluster.
    pub fn configuration(&self, uuid: Uuid) -> Result<&ConfigurationInfo, Error> {
        self.configurations
            .get(&uuid)
            .map(|a| &a.info)
            .ok_or(Error::UnknownConfiguration(uuid))
    }

    /// Returns the identities of all cluster members.
    pub fn configurations(&self) -> Vec<&ConfigurationInfo> {
        self.configurations.values().map(|a| &a.info).collect()
    }

    /// Returns the link table of a cluster member.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownConfiguration`] if `uuid` is not part of
    /// the cluster.
    pub fn links(&self, uuid: Uuid) -> Result<&[ConfigurationLink], Error> {
        self.configurations
            .get(&uuid)
            .map(|a| a.links.as_slice())
            .ok_or(Error::UnknownConfiguration(uuid))
    }

    /// Returns the SQL schema of a cluster member.
    fn schema(&self, uuid: Uuid) -> Result<&str, Error> {
        self.configurations
            .get(&uuid)
            .map(|a| a.schema.as_str())
            .ok_or(Error::UnknownConfiguration(uuid))
    }

    /// Begins a transaction spanning the whole cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if a transaction is already active on the
    /// connection.
    pub fn transaction(&self) -> Result<StoreTransaction<'_>, Error> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(StoreTransaction {
            conn: &self.conn,
            committed: false,
        })
    }

    /// Creates a new workspace at `root`, links it explicitly from
    /// `parent` and attaches it to the cluster.
    ///
    /// An implicit back-link to `parent` is recorded in the new
    /// workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if `parent` is unknown or workspace creation
    /// fails.
    pub fn create_linked(
        &mut self,
        parent: Uuid,
        root: impl AsRef<Path>,
        config_type: ConfigurationType,
        name: Option<&str>,
    ) -> Result<Uuid, Error> {
        let root = root.as_ref();
        self.configuration(parent)?;

        // Create the new workspace store with a connection of its own,
        // then attach it to the cluster connection.
        drop(Store::create(root, config_type, name)?);
        self.attach(root)?;
        let root = canonical_root(root)?;
        let uuid = self
            .configurations
            .values()
            .find(|a| a.info.path == root)
            .map(|a| a.info.uuid)
            .ok_or(Error::NotAWorkspace { path: root.clone() })?;

        self.insert_link(parent, uuid, true)?;
        self.insert_link(uuid, parent, false)?;

        // Refresh the cached link tables of both ends.
        for member in [parent, uuid] {
            let schema = self.schema(member)?.to_string();
            let (_, links) = read_configuration(&self.conn, &schema)?;
            if let Some(attached) = self.configurations.get_mut(&member) {
                attached.links = links;
            }
        }
        Ok(uuid)
    }

    /// Creates the private `host`/`module` child workspace of `parent`
    /// used for build-time dependencies.
    ///
    /// # Errors
    ///
    /// Returns an error if `parent` is unknown or creation fails.
    pub fn create_private_configuration(
        &mut self,
        parent: Uuid,
        config_type: ConfigurationType,
    ) -> Result<Uuid, Error> {
        let parent_root = self.configuration(parent)?.path.clone();
        let root = parent_root.join(STORE_DIR).join(config_type.to_string());
        self.create_linked(parent, root, config_type, Some(config_type.as_ref()))
    }

    /// Inserts a link row into the configuration table of `from`.
    fn insert_link(&self, from: Uuid, to: Uuid, explicit: bool) -> Result<(), Error> {
        let to_info = self.configuration(to)?.clone();
        let schema = self.schema(from)?;
        self.conn.execute(
            &format!(
                "INSERT INTO {schema}.configuration (uuid, name, type, path, expl)
                 VALUES (?1, ?2, ?3, ?4, ?5)"
            ),
            params![
                to_info.uuid.to_string(),
                to_info.name,
                to_info.config_type.to_string(),
                to_info.path.display().to_string(),
                explicit,
            ],
        )?;
        Ok(())
    }

    // Selected packages.

    /// Loads the selected package `name` from workspace `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace is unknown or a row is
    /// malformed.
    pub fn selected_package(
        &self,
        config: Uuid,
        name: &PackageName,
    ) -> Result<Option<SelectedPackage>, Error> {
        let schema = self.schema(config)?;
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT name, version, state, substate, hold_package, hold_version,
                            archive, src_root, out_root, alternatives, config_variables,
                            config_checksum, source_checksum
                     FROM {schema}.selected_package WHERE name = ?1"
                ),
                [name.folded()],
                map_selected_row,
            )
            .optional()?;
        let Some(mut package) = row else {
            return Ok(None);
        };
        package.prerequisites = self.load_prerequisites(schema, &package.name)?;
        Ok(Some(package))
    }

    /// Returns all selected packages of workspace `config`, ordered by
    /// name.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace is unknown or a row is
    /// malformed.
    pub fn selected_packages(&self, config: Uuid) -> Result<Vec<SelectedPackage>, Error> {
        let schema = self.schema(config)?;
        let mut statement = self.conn.prepare(&format!(
            "SELECT name, version, state, substate, hold_package, hold_version,
                    archive, src_root, out_root, alternatives, config_variables,
                    config_checksum, source_checksum
             FROM {schema}.selected_package ORDER BY name"
        ))?;
        let rows = statement.query_map([], map_selected_row)?;
        let mut packages = Vec::new();
        for row in rows {
            let mut package = row?;
            package.prerequisites = self.load_prerequisites(schema, &package.name)?;
            packages.push(package);
        }
        Ok(packages)
    }

    /// Loads the prerequisite set of a selected package.
    fn load_prerequisites(
        &self,
        schema: &str,
        name: &PackageName,
    ) -> Result<BTreeMap<PackageKey, Option<VersionConstraint>>, Error> {
        let mut statement = self.conn.prepare(&format!(
            "SELECT prerequisite_configuration, prerequisite_name, constraint_value
             FROM {schema}.selected_package_prerequisite WHERE name = ?1"
        ))?;
        let rows = statement.query_map([name.folded()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;
        let mut prerequisites = BTreeMap::new();
        for row in rows {
            let (config, prerequisite, constraint) = row?;
            let config = Uuid::parse_str(&config)
                .map_err(|_| Error::Integrity(format!("malformed uuid {config}")))?;
            let key = PackageKey::new(config, PackageName::from_str(&prerequisite)?);
            let constraint = constraint
                .map(|c| VersionConstraint::from_str(&c))
                .transpose()?;
            prerequisites.insert(key, constraint);
        }
        Ok(prerequisites)
    }

    /// Creates or replaces the selected package row in workspace
    /// `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace is unknown or the write fails.
    pub fn save_selected_package(
        &self,
        config: Uuid,
        package: &SelectedPackage,
    ) -> Result<(), Error> {
        let schema = self.schema(config)?;
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {schema}.selected_package
                 (name, version, state, substate, hold_package, hold_version,
                  archive, src_root, out_root, alternatives, config_variables,
                  config_checksum, source_checksum)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            params![
                package.name.as_str(),
                package.version.to_string(),
                package.state.to_string(),
                package.substate.to_string(),
                package.hold_package,
                package.hold_version,
                package.archive.as_ref().map(|p| p.display().to_string()),
                package.src_root.as_ref().map(|p| p.display().to_string()),
                package.out_root.as_ref().map(|p| p.display().to_string()),
                serde_json::to_string(&package.alternatives)?,
                serde_json::to_string(&package.config_variables)?,
                package.config_checksum,
                package.source_checksum,
            ],
        )?;
        self.conn.execute(
            &format!("DELETE FROM {schema}.selected_package_prerequisite WHERE name = ?1"),
            [package.name.folded()],
        )?;
        for (key, constraint) in &package.prerequisites {
            self.conn.execute(
                &format!(
                    "INSERT INTO {schema}.selected_package_prerequisite
                     (name, prerequisite_configuration, prerequisite_name, constraint_value)
                     VALUES (?1, ?2, ?3, ?4)"
                ),
                params![
                    package.name.folded(),
                    key.configuration.to_string(),
                    key.name.as_str(),
                    constraint.as_ref().map(ToString::to_string),
                ],
            )?;
        }
        self.dependent_cache.borrow_mut().clear();
        Ok(())
    }

    /// Deletes the selected package `name` from workspace `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace is unknown or the delete
    /// fails.
    pub fn delete_selected_package(&self, config: Uuid, name: &PackageName) -> Result<(), Error> {
        let schema = self.schema(config)?;
        self.conn.execute(
            &format!("DELETE FROM {schema}.selected_package WHERE name = ?1"),
            [name.folded()],
        )?;
        self.conn.execute(
            &format!("DELETE FROM {schema}.selected_package_prerequisite WHERE name = ?1"),
            [name.folded()],
        )?;
        self.dependent_cache.borrow_mut().clear();
        Ok(())
    }

    /// Returns the dependents of `key` across the cluster: every
    /// selected package whose prerequisite set contains it.
    ///
    /// Results are cached for the lifetime of the store (one resolver
    /// run); the cache is invalidated by selected-package mutations.
    ///
    /// # Errors
    ///
    /// Returns an error if a row is malformed.
    pub fn dependents_of(&self, key: &PackageKey) -> Result<Vec<PackageKey>, Error> {
        let cache_key = (key.configuration, key.name.clone());
        if let Some(hit) = self.dependent_cache.borrow().get(&cache_key) {
            return Ok(hit.clone());
        }
        let mut dependents = Vec::new();
        for attached in self.configurations.values() {
            let schema = &attached.schema;
            let mut statement = self.conn.prepare(&format!(
                "SELECT name FROM {schema}.selected_package_prerequisite
                 WHERE prerequisite_name = ?1 AND prerequisite_configuration = ?2
                 ORDER BY name"
            ))?;
            let rows = statement.query_map(
                params![key.name.folded(), key.configuration.to_string()],
                |row| row.get::<_, String>(0),
            )?;
            for row in rows {
                dependents.push(PackageKey::new(
                    attached.info.uuid,
                    PackageName::from_str(&row?)?,
                ));
            }
        }
        self.dependent_cache
            .borrow_mut()
            .insert(cache_key, dependents.clone());
        Ok(dependents)
    }

    // Available packages.

    /// Inserts an available package into workspace `config`.
    ///
    /// Available packages are immutable: inserting the same
    /// name/version again replaces the row with identical content
    /// harmlessly.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace is unknown or the write fails.
    pub fn insert_available_package(
        &self,
        config: Uuid,
        package: &AvailablePackage,
    ) -> Result<(), Error> {
        let schema = self.schema(config)?;
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {schema}.available_package
                 (name, version, canonical_version, system, type, project, languages,
                  dependencies, bootstrap_build, root_build, sha256sum, locations)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                package.name.as_str(),
                package.version.to_string(),
                package.version.canonical(),
                package.system,
                package.package_type.as_ref().map(ToString::to_string),
                package.project.as_ref().map(ToString::to_string),
                serde_json::to_string(&package.languages)?,
                serde_json::to_string(&package.dependencies)?,
                package.bootstrap_build,
                package.root_build,
                package.sha256sum,
                serde_json::to_string(&package.locations)?,
            ],
        )?;
        Ok(())
    }

    /// Returns all available versions of `name` in workspace `config`,
    /// newest first, with the source candidate preceding the system
    /// one at equal version.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace is unknown or a row is
    /// malformed.
    pub fn available_packages(
        &self,
        config: Uuid,
        name: &PackageName,
    ) -> Result<Vec<AvailablePackage>, Error> {
        let schema = self.schema(config)?;
        let mut statement = self.conn.prepare(&format!(
            "SELECT name, version, system, type, project, languages, dependencies,
                    bootstrap_build, root_build, sha256sum, locations
             FROM {schema}.available_package
             WHERE name = ?1 ORDER BY canonical_version DESC, system"
        ))?;
        let rows = statement.query_map([name.folded()], map_available_row)?;
        let mut packages = Vec::new();
        for row in rows {
            packages.push(row?);
        }
        Ok(packages)
    }

    /// Returns the available versions of `name` satisfying
    /// `constraint`, newest first.
    ///
    /// # Errors
    ///
    /// See [`Store::available_packages`].
    pub fn available_packages_satisfying(
        &self,
        config: Uuid,
        name: &PackageName,
        constraint: Option<&VersionConstraint>,
    ) -> Result<Vec<AvailablePackage>, Error> {
        let mut packages = self.available_packages(config, name)?;
        if let Some(constraint) = constraint {
            packages.retain(|p| constraint.satisfies(&p.version));
        }
        Ok(packages)
    }

    /// Returns one available package by exact name and version.
    ///
    /// # Errors
    ///
    /// See [`Store::available_packages`].
    pub fn available_package(
        &self,
        config: Uuid,
        name: &PackageName,
        version: &Version,
    ) -> Result<Option<AvailablePackage>, Error> {
        Ok(self
            .available_packages(config, name)?
            .into_iter()
            .find(|p| &p.version == version))
    }

    // Repositories and fragments.

    /// Creates or replaces a repository together with its fragment
    /// associations.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace is unknown or the write fails.
    pub fn save_repository(&self, config: Uuid, repository: &Repository) -> Result<(), Error> {
        let schema = self.schema(config)?;
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {schema}.repository (name, location, certificate)
                 VALUES (?1, ?2, ?3)"
            ),
            params![repository.name, repository.location, repository.certificate],
        )?;
        self.conn.execute(
            &format!("DELETE FROM {schema}.repository_fragment_association WHERE repository = ?1"),
            [&repository.name],
        )?;
        for fragment in &repository.fragments {
            self.conn.execute(
                &format!(
                    "INSERT INTO {schema}.repository_fragment_association (repository, fragment)
                     VALUES (?1, ?2)"
                ),
                params![repository.name, fragment],
            )?;
        }
        Ok(())
    }

    /// Loads a repository and its fragment names.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace is unknown or a row is
    /// malformed.
    pub fn repository(&self, config: Uuid, name: &str) -> Result<Option<Repository>, Error> {
        let schema = self.schema(config)?;
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT name, location, certificate FROM {schema}.repository WHERE name = ?1"
                ),
                [name],
                |row| {
                    Ok(Repository {
                        name: row.get(0)?,
                        location: row.get(1)?,
                        certificate: row.get(2)?,
                        fragments: Vec::new(),
                    })
                },
            )
            .optional()?;
        let Some(mut repository) = row else {
            return Ok(None);
        };
        let mut statement = self.conn.prepare(&format!(
            "SELECT fragment FROM {schema}.repository_fragment_association
             WHERE repository = ?1 ORDER BY fragment"
        ))?;
        let rows = statement.query_map([name], |row| row.get::<_, String>(0))?;
        for row in rows {
            repository.fragments.push(row?);
        }
        Ok(Some(repository))
    }

    /// Creates or replaces a repository fragment together with its
    /// complement and prerequisite references.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace is unknown or the write fails.
    pub fn save_repository_fragment(
        &self,
        config: Uuid,
        fragment: &RepositoryFragment,
    ) -> Result<(), Error> {
        let schema = self.schema(config)?;
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {schema}.repository_fragment (name, location)
                 VALUES (?1, ?2)"
            ),
            params![fragment.name, fragment.location],
        )?;
        for (table, values) in [
            ("repository_fragment_complement", &fragment.complements),
            ("repository_fragment_prerequisite", &fragment.prerequisites),
        ] {
            self.conn.execute(
                &format!("DELETE FROM {schema}.{table} WHERE fragment = ?1"),
                [&fragment.name],
            )?;
            for value in values {
                self.conn.execute(
                    &format!("INSERT INTO {schema}.{table} VALUES (?1, ?2)"),
                    params![fragment.name, value],
                )?;
            }
        }
        Ok(())
    }

    /// Loads a repository fragment.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace is unknown or a row is
    /// malformed.
    pub fn repository_fragment(
        &self,
        config: Uuid,
        name: &str,
    ) -> Result<Option<RepositoryFragment>, Error> {
        let schema = self.schema(config)?;
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT name, location FROM {schema}.repository_fragment WHERE name = ?1"
                ),
                [name],
                |row| {
                    Ok(RepositoryFragment {
                        name: row.get(0)?,
                        location: row.get(1)?,
                        complements: Vec::new(),
                        prerequisites: Vec::new(),
                    })
                },
            )
            .optional()?;
        let Some(mut fragment) = row else {
            return Ok(None);
        };
        for (table, target) in [
            ("repository_fragment_complement", "complement"),
            ("repository_fragment_prerequisite", "prerequisite"),
        ] {
            let mut statement = self.conn.prepare(&format!(
                "SELECT {target} FROM {schema}.{table} WHERE fragment = ?1 ORDER BY {target}"
            ))?;
            let rows = statement.query_map([name], |row| row.get::<_, String>(0))?;
            for row in rows {
                match target {
                    "complement" => fragment.complements.push(row?),
                    _ => fragment.prerequisites.push(row?),
                }
            }
        }
        Ok(Some(fragment))
    }

    /// Drops a repository: removes the repository row, any fragment no
    /// longer associated with a repository, and every available package
    /// that lost its last location.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace is unknown or a row is
    /// malformed.
    pub fn drop_repository(&self, config: Uuid, name: &str) -> Result<(), Error> {
        let schema = self.schema(config)?.to_string();
        self.conn.execute(
            &format!("DELETE FROM {schema}.repository WHERE name = ?1"),
            [name],
        )?;
        self.conn.execute(
            &format!("DELETE FROM {schema}.repository_fragment_association WHERE repository = ?1"),
            [name],
        )?;

        // Fragments without a remaining association are orphaned.
        self.conn.execute(
            &format!(
                "DELETE FROM {schema}.repository_fragment WHERE name NOT IN
                 (SELECT fragment FROM {schema}.repository_fragment_association)"
            ),
            [],
        )?;
        for table in [
            "repository_fragment_complement",
            "repository_fragment_prerequisite",
        ] {
            self.conn.execute(
                &format!(
                    "DELETE FROM {schema}.{table} WHERE fragment NOT IN
                     (SELECT name FROM {schema}.repository_fragment)"
                ),
                [],
            )?;
        }

        // Available packages whose every location refers to a removed
        // fragment are gone with it.
        let mut statement = self.conn.prepare(&format!(
            "SELECT name, version, locations FROM {schema}.available_package"
        ))?;
        let rows = statement.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut doomed = Vec::new();
        for row in rows {
            let (name, version, locations) = row?;
            let locations: Vec<brig_types::FragmentLocation> = serde_json::from_str(&locations)?;
            let mut live = false;
            for location in &locations {
                let Some(fragment) = &location.fragment else {
                    live = true;
                    break;
                };
                if self.repository_fragment(config, fragment)?.is_some() {
                    live = true;
                    break;
                }
            }
            if !live {
                doomed.push((name, version));
            }
        }
        drop(statement);
        for (name, version) in doomed {
            self.conn.execute(
                &format!(
                    "DELETE FROM {schema}.available_package WHERE name = ?1 AND version = ?2"
                ),
                params![name, version],
            )?;
        }
        Ok(())
    }

    // Certificates.

    /// Loads a certificate record by abbreviated fingerprint.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace is unknown or a row is
    /// malformed.
    pub fn certificate(
        &self,
        config: Uuid,
        fingerprint: &str,
    ) -> Result<Option<CertificateRecord>, Error> {
        let schema = self.schema(config)?;
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT fingerprint, name, organization, email, not_before, not_after, dummy
                     FROM {schema}.certificate WHERE fingerprint = ?1"
                ),
                [fingerprint],
                |row| {
                    Ok(CertificateRecord {
                        fingerprint: row.get(0)?,
                        name: row.get(1)?,
                        organization: row.get(2)?,
                        email: row.get(3)?,
                        not_before: row.get(4)?,
                        not_after: row.get(5)?,
                        dummy: row.get(6)?,
                    })
                },
            )
            .optional()?)
    }

    /// Creates or replaces a certificate record.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace is unknown or the write fails.
    pub fn save_certificate(
        &self,
        config: Uuid,
        certificate: &CertificateRecord,
    ) -> Result<(), Error> {
        let schema = self.schema(config)?;
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {schema}.certificate
                 (fingerprint, name, organization, email, not_before, not_after, dummy)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            ),
            params![
                certificate.fingerprint,
                certificate.name,
                certificate.organization,
                certificate.email,
                certificate.not_before,
                certificate.not_after,
                certificate.dummy,
            ],
        )?;
        Ok(())
    }

    /// Returns the per-run scratch directory of a cluster member.
    ///
    /// The directory exists for the lifetime of the store and is
    /// removed on drop unless `keep_tmp` was requested.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownConfiguration`] if `config` is not part
    /// of the cluster.
    pub fn scratch_dir(&self, config: Uuid) -> Result<PathBuf, Error> {
        Ok(self
            .configuration(config)?
            .path
            .join(STORE_DIR)
            .join(TMP_DIR))
    }

    /// Returns the certificate directory of a cluster member, creating
    /// it if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace is unknown or the directory
    /// cannot be created.
    pub fn certificate_dir(&self, config: Uuid) -> Result<PathBuf, Error> {
        let dir = self
            .configuration(config)?
            .path
            .join(STORE_DIR)
            .join("certs");
        fs::create_dir_all(&dir).map_err(|source| Error::IoPath {
            path: dir.clone(),
            context: "creating the certificate directory".to_string(),
            source,
        })?;
        Ok(dir)
    }

    /// Checks the cluster-wide consistency invariants.
    ///
    /// - A `configured` selected package has all prerequisites
    ///   `configured` in their workspaces.
    /// - Holds only exist on `configured` or `unpacked` packages.
    /// - Recorded alternative indices are valid for the declared
    ///   dependency groups when the matching available package is
    ///   known.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Integrity`] naming the first violation found.
    pub fn verify_integrity(&self) -> Result<(), Error> {
        let members: Vec<Uuid> = self.configurations.keys().copied().collect();
        for uuid in members {
            for package in self.selected_packages(uuid)? {
                if package.held()
                    && !matches!(
                        package.state,
                        PackageState::Configured | PackageState::Unpacked
                    )
                {
                    return Err(Error::Integrity(format!(
                        "held package {package} is neither configured nor unpacked"
                    )));
                }
                if package.state == PackageState::Configured {
                    for key in package.prerequisites.keys() {
                        let prerequisite = self
                            .selected_package(key.configuration, &key.name)?
                            .ok_or_else(|| {
                                Error::Integrity(format!(
                                    "prerequisite {key} of {package} is not selected"
                                ))
                            })?;
                        if prerequisite.state != PackageState::Configured {
                            return Err(Error::Integrity(format!(
                                "prerequisite {key} of configured {package} is {}",
                                prerequisite.state
                            )));
                        }
                    }
                }
                if let Some(available) =
                    self.available_package(uuid, &package.name, &package.version)?
                {
                    if package.alternatives.len() > available.dependencies.len() {
                        return Err(Error::Integrity(format!(
                            "{package} records more alternatives than declared groups"
                        )));
                    }
                    for (index, selected) in package.alternatives.iter().enumerate() {
                        let group = &available.dependencies[index];
                        if *selected > group.alternatives.len() {
                            return Err(Error::Integrity(format!(
                                "{package} records invalid alternative {selected} for group {}",
                                index + 1
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl Drop for Store {
    /// Removes the per-run scratch directories unless `keep_tmp` was
    /// requested.
    fn drop(&mut self) {
        if !self.keep_tmp {
            for tmp in &self.tmp_dirs {
                let _ = fs::remove_dir_all(tmp);
            }
        }
    }
}

/// Canonicalizes a workspace root.
fn canonical_root(root: &Path) -> Result<PathBuf, Error> {
    root.canonicalize().map_err(|source| Error::IoPath {
        path: root.to_path_buf(),
        context: "resolving the workspace root".to_string(),
        source,
    })
}

/// Reads the self row and link table of the database attached under
/// `schema`.
fn read_configuration(
    conn: &Connection,
    schema: &str,
) -> Result<(ConfigurationInfo, Vec<ConfigurationLink>), Error> {
    let mut statement = conn.prepare(&format!(
        "SELECT id, uuid, name, type, path, expl FROM {schema}.configuration ORDER BY id"
    ))?;
    let rows = statement.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, bool>(5)?,
        ))
    })?;

    let mut info = None;
    let mut links = Vec::new();
    for row in rows {
        let (id, uuid, name, config_type, path, explicit) = row?;
        let uuid = Uuid::parse_str(&uuid)
            .map_err(|_| Error::Integrity(format!("malformed uuid {uuid}")))?;
        let config_type = ConfigurationType::from_str(&config_type)
            .map_err(|_| Error::Integrity(format!("malformed workspace type {config_type}")))?;
        let path = PathBuf::from(path);
        if id == 0 {
            info = Some(ConfigurationInfo {
                uuid,
                name: name.clone(),
                config_type,
                path: path.clone(),
            });
        }
        links.push(ConfigurationLink {
            id,
            uuid,
            config_type,
            path,
            explicit,
        });
    }
    let info = info.ok_or(Error::Integrity("missing self link".to_string()))?;
    Ok((info, links))
}

/// Removes implicit links whose target directory no longer exists.
fn prune_dangling_implicit_links(conn: &Connection, schema: &str) -> Result<(), Error> {
    let mut statement = conn.prepare(&format!(
        "SELECT id, path FROM {schema}.configuration WHERE expl = 0"
    ))?;
    let rows = statement.query_map([], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut dangling = Vec::new();
    for row in rows {
        let (id, path) = row?;
        if !Path::new(&path).join(STORE_DIR).join(DB_FILE).is_file() {
            dangling.push((id, path));
        }
    }
    drop(statement);
    for (id, path) in dangling {
        warn!("removing dangling implicit link to {path}");
        conn.execute(
            &format!("DELETE FROM {schema}.configuration WHERE id = ?1"),
            [id],
        )?;
    }
    Ok(())
}

/// Maps a `selected_package` row, leaving the prerequisite set empty.
fn map_selected_row(row: &rusqlite::Row) -> rusqlite::Result<SelectedPackage> {
    let name: String = row.get(0)?;
    let version: String = row.get(1)?;
    let state: String = row.get(2)?;
    let substate: String = row.get(3)?;
    let alternatives: String = row.get(9)?;
    let config_variables: String = row.get(10)?;
    Ok(SelectedPackage {
        name: PackageName::from_str(&name).map_err(|e| bad_column(0, e))?,
        version: Version::from_str(&version).map_err(|e| bad_column(1, e))?,
        state: state.parse().map_err(|e| bad_column(2, e))?,
        substate: substate.parse().map_err(|e| bad_column(3, e))?,
        hold_package: row.get(4)?,
        hold_version: row.get(5)?,
        archive: row.get::<_, Option<String>>(6)?.map(PathBuf::from),
        src_root: row.get::<_, Option<String>>(7)?.map(PathBuf::from),
        out_root: row.get::<_, Option<String>>(8)?.map(PathBuf::from),
        prerequisites: BTreeMap::new(),
        alternatives: serde_json::from_str(&alternatives).map_err(|e| bad_column(9, e))?,
        config_variables: serde_json::from_str(&config_variables)
            .map_err(|e| bad_column(10, e))?,
        config_checksum: row.get(11)?,
        source_checksum: row.get(12)?,
    })
}

/// Maps an `available_package` row.
fn map_available_row(row: &rusqlite::Row) -> rusqlite::Result<AvailablePackage> {
    let name: String = row.get(0)?;
    let version: String = row.get(1)?;
    let package_type: Option<String> = row.get(3)?;
    let project: Option<String> = row.get(4)?;
    let languages: String = row.get(5)?;
    let dependencies: String = row.get(6)?;
    let locations: String = row.get(10)?;
    Ok(AvailablePackage {
        name: PackageName::from_str(&name).map_err(|e| bad_column(0, e))?,
        version: Version::from_str(&version).map_err(|e| bad_column(1, e))?,
        system: row.get(2)?,
        package_type: package_type
            .map(|t| t.parse())
            .transpose()
            .map_err(|e| bad_column(3, e))?,
        project: project
            .map(|p| p.parse())
            .transpose()
            .map_err(|e| bad_column(4, e))?,
        languages: serde_json::from_str(&languages).map_err(|e| bad_column(5, e))?,
        dependencies: serde_json::from_str(&dependencies).map_err(|e| bad_column(6, e))?,
        bootstrap_build: row.get(7)?,
        root_build: row.get(8)?,
        sha256sum: row.get(9)?,
        locations: serde_json::from_str(&locations).map_err(|e| bad_column(10, e))?,
    })
}

/// Wraps a column decoding failure into a rusqlite error so that row
/// mapping closures can use `?`.
fn bad_column(
    index: usize,
    error: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        Box::new(error),
    )
}
