//! Checks a database description from communal storage against the
//! VerticaDB before reviving it, and works out the spec changes needed to
//! line the two up.

use crate::error::{ReconcileError, Result};
use crate::vdb::VerticaDB;
use serde::Deserialize;
use tracing::debug;

pub trait RevivePlanner: Send + Sync {
    /// Load the describe output
    fn parse(&mut self, op: &str) -> Result<()>;

    /// `Err` carries a message for the user explaining the mismatch
    fn is_compatible(&self) -> std::result::Result<(), String>;

    /// Update the spec to match the described database. Returns true if
    /// anything changed.
    fn apply_changes(&self, vdb: &mut VerticaDB) -> Result<bool>;
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DescribedNode {
    name: String,
    #[serde(default)]
    address: String,
    catalog_path: String,
    #[serde(default)]
    storage_locations: Vec<String>,
    #[serde(default)]
    is_primary: bool,
    #[serde(default)]
    subcluster_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DescribedDatabase {
    db_name: String,
    #[serde(default)]
    num_shards: i32,
    #[serde(default)]
    nodes: Vec<DescribedNode>,
}

/// Local paths shared by every node of the described database
#[derive(Debug, Clone, PartialEq, Eq)]
struct LocalPaths {
    catalog: String,
    data: String,
    depot: Option<String>,
}

/// Planner for the JSON the admintools describe command produces
#[derive(Debug, Default)]
pub struct AtPlanner {
    database: Option<DescribedDatabase>,
}

impl AtPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    fn database(&self) -> std::result::Result<&DescribedDatabase, String> {
        self.database
            .as_ref()
            .ok_or_else(|| "no database description was parsed".to_string())
    }

    /// Common path prefixes across all nodes
    fn local_paths(db: &DescribedDatabase) -> std::result::Result<LocalPaths, String> {
        let mut paths: Option<LocalPaths> = None;
        for node in &db.nodes {
            let catalog = path_prefix(&node.catalog_path, &db.db_name).ok_or_else(|| {
                format!(
                    "unable to find the catalog path prefix of node '{}' from '{}'",
                    node.name, node.catalog_path
                )
            })?;
            let data = node
                .storage_locations
                .iter()
                .filter(|l| l.ends_with("_data"))
                .find_map(|l| path_prefix(l, &db.db_name))
                .ok_or_else(|| format!("unable to find a data location for node '{}'", node.name))?;
            let depot = node
                .storage_locations
                .iter()
                .filter(|l| l.ends_with("_depot"))
                .find_map(|l| path_prefix(l, &db.db_name));
            let node_paths = LocalPaths {
                catalog,
                data,
                depot,
            };

            match &paths {
                None => paths = Some(node_paths),
                Some(p) if *p != node_paths => {
                    return Err(format!(
                        "node '{}' uses local paths that differ from the other nodes. \
                         Every node must have the same catalog, data and depot paths",
                        node.name
                    ))
                }
                Some(_) => {}
            }
        }
        paths.ok_or_else(|| "the database description has no nodes".to_string())
    }
}

/// Strip `/<db>/v_<db>_nodeNNNN_<suffix>` and whatever follows from a node
/// local path
fn path_prefix(path: &str, db_name: &str) -> Option<String> {
    let marker = format!("/{}/v_{}_node", db_name, db_name.to_lowercase());
    path.find(&marker).map(|idx| path[..idx].to_string())
}

impl RevivePlanner for AtPlanner {
    fn parse(&mut self, op: &str) -> Result<()> {
        let db: DescribedDatabase = serde_json::from_str(op)
            .map_err(|e| ReconcileError::Planner(format!("failed to parse describe output: {e}")))?;
        debug!(
            db = %db.db_name,
            nodes = db.nodes.len(),
            shards = db.num_shards,
            primaries = db.nodes.iter().filter(|n| n.is_primary).count(),
            "Parsed database description"
        );
        for n in &db.nodes {
            debug!(node = %n.name, address = %n.address, subcluster = %n.subcluster_name, "Described node");
        }
        self.database = Some(db);
        Ok(())
    }

    fn is_compatible(&self) -> std::result::Result<(), String> {
        let db = self.database()?;
        if db.num_shards <= 0 {
            return Err(format!(
                "the database description has an invalid shard count of {}",
                db.num_shards
            ));
        }
        Self::local_paths(db).map(|_| ())
    }

    fn apply_changes(&self, vdb: &mut VerticaDB) -> Result<bool> {
        let db = self.database().map_err(ReconcileError::Planner)?;
        let paths = Self::local_paths(db).map_err(ReconcileError::Planner)?;
        let local = &mut vdb.spec.local;
        let mut changed = false;

        if local.get_catalog_path() != paths.catalog {
            local.catalog_path = paths.catalog.clone();
            changed = true;
        }
        if local.data_path != paths.data {
            local.data_path = paths.data.clone();
            changed = true;
        }
        if let Some(depot) = paths.depot {
            if local.depot_path != depot {
                local.depot_path = depot;
                changed = true;
            }
        }
        if vdb.spec.shard_count != db.num_shards {
            vdb.spec.shard_count = db.num_shards;
            changed = true;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::make_vdb;

    fn describe(catalog: &str, data: &str, depot: &str, shards: i32) -> String {
        serde_json::json!({
            "db_name": "vertdb",
            "num_shards": shards,
            "nodes": [
                {
                    "name": "v_vertdb_node0001",
                    "address": "10.0.0.1",
                    "catalog_path": format!("{catalog}/vertdb/v_vertdb_node0001_catalog/Catalog"),
                    "storage_locations": [
                        format!("{data}/vertdb/v_vertdb_node0001_data"),
                        format!("{depot}/vertdb/v_vertdb_node0001_depot"),
                    ],
                    "is_primary": true,
                    "subcluster_name": "sc1"
                },
                {
                    "name": "v_vertdb_node0002",
                    "address": "10.0.0.2",
                    "catalog_path": format!("{catalog}/vertdb/v_vertdb_node0002_catalog/Catalog"),
                    "storage_locations": [
                        format!("{data}/vertdb/v_vertdb_node0002_data"),
                        format!("{depot}/vertdb/v_vertdb_node0002_depot"),
                    ],
                    "is_primary": true,
                    "subcluster_name": "sc1"
                }
            ]
        })
        .to_string()
    }

    #[test]
    fn test_matching_description_changes_nothing() {
        let mut planner = AtPlanner::new();
        planner.parse(&describe("/data", "/data", "/depot", 6)).unwrap();
        assert_eq!(planner.is_compatible(), Ok(()));

        let mut vdb = make_vdb();
        assert!(!planner.apply_changes(&mut vdb).unwrap());
    }

    #[test]
    fn test_apply_paths_and_shards() {
        let mut planner = AtPlanner::new();
        planner
            .parse(&describe("/catalog", "/vertica/data", "/vertica/depot", 12))
            .unwrap();
        assert!(planner.is_compatible().is_ok());

        let mut vdb = make_vdb();
        assert!(planner.apply_changes(&mut vdb).unwrap());
        assert_eq!(vdb.spec.local.catalog_path, "/catalog");
        assert_eq!(vdb.spec.local.data_path, "/vertica/data");
        assert_eq!(vdb.spec.local.depot_path, "/vertica/depot");
        assert_eq!(vdb.spec.shard_count, 12);
        assert!(!planner.apply_changes(&mut vdb).unwrap());
    }

    #[test]
    fn test_inconsistent_paths_are_incompatible() {
        let mut op: serde_json::Value =
            serde_json::from_str(&describe("/data", "/data", "/depot", 6)).unwrap();
        op["nodes"][1]["catalog_path"] =
            serde_json::json!("/other/vertdb/v_vertdb_node0002_catalog/Catalog");
        let mut planner = AtPlanner::new();
        planner.parse(&op.to_string()).unwrap();
        let msg = planner.is_compatible().unwrap_err();
        assert!(msg.contains("v_vertdb_node0002"));
    }

    #[test]
    fn test_bad_shard_count_and_no_nodes() {
        let mut planner = AtPlanner::new();
        planner.parse(&describe("/data", "/data", "/depot", 0)).unwrap();
        assert!(planner.is_compatible().is_err());

        planner
            .parse(r#"{"db_name":"vertdb","num_shards":6,"nodes":[]}"#)
            .unwrap();
        assert!(planner.is_compatible().unwrap_err().contains("no nodes"));
    }

    #[test]
    fn test_parse_errors() {
        let mut planner = AtPlanner::new();
        assert!(matches!(
            planner.parse("Database vertdb does not exist"),
            Err(ReconcileError::Planner(_))
        ));
        assert!(planner.is_compatible().is_err());
    }

    #[test]
    fn test_path_prefix() {
        assert_eq!(
            path_prefix("/a/b/VertDB/v_vertdb_node0001_catalog/Catalog", "VertDB"),
            Some("/a/b".to_string())
        );
        assert_eq!(path_prefix("/a/b/other", "vertdb"), None);
    }
}
