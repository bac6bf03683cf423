use crate::crd::{Subcluster, VerticaDB};
use crate::types::ObjectKey;
use kube::ResourceExt;

/// Subcluster name made safe for use inside a DNS label
pub fn compatible_fqdn(name: &str) -> String {
    name.replace('_', "-").to_lowercase()
}

/// StatefulSet backing a subcluster
pub fn sts_name(vdb: &VerticaDB, sc: &Subcluster) -> ObjectKey {
    ObjectKey::new(
        vdb.namespace().unwrap_or_default(),
        format!("{}-{}", vdb.name_any(), compatible_fqdn(&sc.name)),
    )
}

/// Pod at `index` of a subcluster's StatefulSet
pub fn pod_name(vdb: &VerticaDB, sc: &Subcluster, index: i32) -> ObjectKey {
    let sts = sts_name(vdb, sc);
    ObjectKey::new(sts.namespace, format!("{}-{}", sts.name, index))
}

/// Sandbox ConfigMap for the given sandbox
pub fn sandbox_config_map_name(vdb: &VerticaDB, sandbox: &str) -> ObjectKey {
    sandbox_config_map_key(&vdb.namespace().unwrap_or_default(), &vdb.name_any(), sandbox)
}

pub fn sandbox_config_map_key(namespace: &str, vdb_name: &str, sandbox: &str) -> ObjectKey {
    ObjectKey::new(namespace, format!("{}-{}", vdb_name, sandbox))
}

/// Pod names for every index below the subcluster's size
pub fn gen_pod_names(vdb: &VerticaDB, sc: &Subcluster) -> Vec<ObjectKey> {
    (0..sc.size).map(|i| pod_name(vdb, sc, i)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{SubclusterType, VerticaDbSpec};

    fn make_test_vdb() -> VerticaDB {
        let mut vdb = VerticaDB::new(
            "vertdb",
            VerticaDbSpec {
                image: "vertica".to_string(),
                db_name: "vertdb".to_string(),
                init_policy: Default::default(),
                communal: Default::default(),
                local: Default::default(),
                shard_count: 3,
                auto_restart_vertica: true,
                password_secret: None,
                subclusters: vec![],
                sandboxes: vec![],
            },
        );
        vdb.metadata.namespace = Some("ns".to_string());
        vdb
    }

    #[test]
    fn test_names() {
        let vdb = make_test_vdb();
        let sc = Subcluster {
            name: "Analytics_1".to_string(),
            type_: SubclusterType::Secondary,
            size: 2,
            shutdown: false,
        };
        assert_eq!(sts_name(&vdb, &sc).to_string(), "ns/vertdb-analytics-1");
        assert_eq!(pod_name(&vdb, &sc, 1).name, "vertdb-analytics-1-1");
        assert_eq!(gen_pod_names(&vdb, &sc).len(), 2);
        assert_eq!(sandbox_config_map_name(&vdb, "sand").name, "vertdb-sand");
    }
}
