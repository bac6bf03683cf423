//! In-pod state gathering.
//!
//! One exec per pod runs a small shell script that prints YAML. The keys
//! must stay in sync with `GatherState`.

use crate::podfacts::PodFact;
use serde::Deserialize;
use verticadb_core::{meta, VerticaDB};

/// Port of the server's HTTPS service
const VERTICA_HTTP_PORT: u16 = 8443;

/// Marker printed first by the script, also used to recognise it in tests
pub const GATHER_MARKER: &str = "installIndicatorExists";

/// State reported by the gather script
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatherState {
    #[serde(default)]
    pub install_indicator_exists: bool,
    #[serde(default)]
    pub eula_accepted: bool,
    #[serde(default)]
    pub db_exists: bool,
    #[serde(default, rename = "verticaPIDRunning")]
    pub vertica_pid_running: bool,
    #[serde(default)]
    pub up_node: bool,
    #[serde(default)]
    pub startup_complete: bool,
    #[serde(default)]
    pub compat21_node_name: String,
    #[serde(default)]
    pub vnode_name: String,
}

impl GatherState {
    pub fn parse(stdout: &str) -> Result<Self, serde_yaml::Error> {
        if stdout.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(stdout)
    }
}

/// Script run inside the pod's exec container
pub fn gather_script(vdb: &VerticaDB, pf: &PodFact, catalog_path: &str) -> String {
    let db = &vdb.spec.db_name;
    let db_lower = db.to_lowercase();
    // Primaries always hold a config catalog. Secondaries may only have the
    // directory, e.g. right after a revive.
    let catalog_check = if pf.is_primary {
        "Catalog/*config*.cat"
    } else {
        "Catalog"
    };
    let mut script = format!(
        r#"set -o errexit
set -o pipefail
echo -n '{marker}: '
test -f {install} && echo true || echo false
echo -n 'eulaAccepted: '
test -f {eula} && echo true || echo false
echo -n 'dbExists: '
ls --almost-all --hide-control-chars -1 {cat}/{db}/v_{dbl}_node????_catalog/{check} 2> /dev/null | grep --quiet . && echo true || echo false
echo -n 'compat21NodeName: '
test -f {install} && echo -n '"' && echo -n $(cat {install}) && echo '"' || echo '""'
echo -n 'vnodeName: '
cd {cat}/{db}/v_{dbl}_node????_catalog 2> /dev/null && basename $(pwd) | rev | cut -c9- | rev || echo ""
echo -n 'upNode: '
curl -k -s -o /dev/null -w '%{{http_code}}' https://{ip}:{port}/v1/version 2> /dev/null | grep --quiet 200 2> /dev/null && echo true || echo false
echo -n 'startupComplete: '
grep --quiet -e 'Startup Complete' -e 'Database Halted' {cat}/{db}/*_catalog/startup.log 2> /dev/null && echo true || echo false
"#,
        marker = GATHER_MARKER,
        install = meta::INSTALL_INDICATOR_FILE,
        eula = meta::EULA_ACCEPTANCE_FILE,
        cat = catalog_path,
        db = db,
        dbl = db_lower,
        check = catalog_check,
        ip = pf.pod_ip,
        port = VERTICA_HTTP_PORT,
    );
    // The server process is only visible when we exec into its container
    if pf.exec_container == meta::SERVER_CONTAINER {
        script.push_str(&format!(
            r#"echo -n 'verticaPIDRunning: '
[[ $(pgrep -f "/opt/vertica/bin/vertica.*-h {ip}") ]] && echo true || echo false
"#,
            ip = pf.pod_ip
        ));
    }
    script
}
