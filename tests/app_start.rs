//! Starting the host from a configuration file.

use std::fs;
use std::sync::Arc;

use charthost::{Application, HostError, Scope, ScriptHost, UserDataCapability};
use mlua::UserData;
use serde_json::json;

#[derive(Clone)]
struct NoSources;

impl UserData for NoSources {}

// Installs the global subscriber, so it is the only test in this binary.
#[test]
fn test_start_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let scripts = dir.path().join("charts");
    fs::create_dir(&scripts).unwrap();
    fs::write(scripts.join("pie.lua"), "slices = #params.values").unwrap();

    let log_file = dir.path().join("logs/charthost.log");
    let config_path = dir.path().join("charthost.toml");
    fs::write(
        &config_path,
        format!(
            "[scripts]\npath = {:?}\n\n[logging]\nlevel = \"info\"\nfile = {:?}\n",
            scripts.to_string_lossy(),
            log_file.to_string_lossy()
        ),
    )
    .unwrap();

    let app = Application::start(&config_path).unwrap();
    assert_eq!(app.provider().list().unwrap(), vec!["pie.lua"]);

    let mut script = app.create_script("pie.lua");
    script
        .configure(Arc::new(UserDataCapability::new(NoSources)))
        .unwrap();
    let context = app.factory().enter().unwrap();
    script
        .set_scope(Box::new(Scope::new(&context).unwrap()))
        .unwrap();
    let params = json!({ "values": [1, 2, 3] });
    script.execute(params.as_object()).unwrap();
    assert_eq!(script.lookup_json("slices").unwrap(), json!(3));

    let logged = fs::read_to_string(&log_file).unwrap();
    assert!(logged.contains("script host started"), "{logged}");
    assert!(logged.contains("script evaluated"), "{logged}");

    // A second start cannot install logging again.
    assert!(matches!(
        Application::start(&config_path),
        Err(HostError::Settings(_))
    ));
}
