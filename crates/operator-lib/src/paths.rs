//! Well-known paths inside the Vertica server container

/// Root of the admintools configuration that is backed by a PV
pub const CONFIG_PATH: &str = "/opt/vertica/config";
pub const ADMIN_TOOLS_CONF: &str = "/opt/vertica/config/admintools.conf";
pub const CONFIG_SHARE_PATH: &str = "/opt/vertica/config/share";
pub const CONFIG_LICENSING_PATH: &str = "/opt/vertica/config/licensing";
pub const CONFIG_LOGROTATE_PATH: &str = "/opt/vertica/config/logrotate";
pub const LOGROTATE_AT_FILE: &str = "/opt/vertica/config/logrotate/admintool.logrotate";
pub const LOGROTATE_BASE_CONF_FILE: &str = "/opt/vertica/config/logrotate_base.conf";
pub const CE_LICENSE_FILE: &str =
    "/home/dbadmin/licensing/ce/vertica_community_edition.license.key";

/// Presence of this file means the EULA was accepted in the pod
pub const EULA_ACCEPTANCE_FILE: &str = "/opt/vertica/config/d5415f948449e9d4c421b568f2411140.dat";
pub const EULA_ACCEPTANCE_SCRIPT: &str = "/home/dbadmin/accept_eula.py";

pub const HTTP_TLS_CONF_DIR: &str = "/opt/vertica/config/https_certs";
pub const HTTP_TLS_CONF_FILE_NAME: &str = "httpstls.json";
pub const HTTP_TLS_CONF_FILE: &str = "/opt/vertica/config/https_certs/httpstls.json";

pub const AGENT_CERT_FILE: &str = "/opt/vertica/config/share/agent.cert";
pub const AGENT_KEY_FILE: &str = "/opt/vertica/config/share/agent.key";
pub const VERTICA_API_KEYS_FILE: &str = "/opt/vertica/config/apikeys.dat";
pub const DBADMIN_AGENT_PATH: &str = "/home/dbadmin/agent";

/// Prefix of the install indicator. The VerticaDB UID is appended.
pub const INSTALLER_INDICATOR_FILE: &str = "/opt/vertica/config/share/vertica-k8s-installed-";

pub const POD_FACT_GATHER_SCRIPT: &str = "/tmp/gather_pod.sh";
pub const CREATE_CONFIG_DIRS_SCRIPT: &str = "/tmp/create-config-dirs.sh";
pub const AUTH_PARMS_FILE: &str = "/home/dbadmin/auth_parms.conf";
pub const REIP_MAP_FILE: &str = "/opt/vertica/config/ipmap.txt";

pub const ADMINTOOLS: &str = "/opt/vertica/bin/admintools";
pub const PYTHON3: &str = "/opt/vertica/oss/python3/bin/python3";

/// Directories the probe script checks for
pub const PROBED_DIRS: &[&str] = &[
    CONFIG_LOGROTATE_PATH,
    CONFIG_SHARE_PATH,
    CONFIG_LICENSING_PATH,
    HTTP_TLS_CONF_DIR,
];

/// Files the probe script checks for
pub const PROBED_FILES: &[&str] = &[
    ADMIN_TOOLS_CONF,
    CE_LICENSE_FILE,
    LOGROTATE_AT_FILE,
    LOGROTATE_BASE_CONF_FILE,
    HTTP_TLS_CONF_FILE,
    AGENT_CERT_FILE,
    AGENT_KEY_FILE,
    VERTICA_API_KEYS_FILE,
];
