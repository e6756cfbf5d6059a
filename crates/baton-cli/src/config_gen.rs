const STARTER_CONFIG: &str = r#"# baton configuration

[store]
# http(s) URL of the artifact server, or a local directory path.
url = "https://artifacts.example.com"
# token = "..."
# retention_days = 14

[checkpoint]
# Artifact base name; volumes are "{name}-vol001".. and the manifest
# "{name}-manifest".
name = "my-build"
# chunk_size_limit = 2147483648
# max_volumes = 500
# compression_level = 3
# strategy = "chunked"   # or "whole" when local disk is not a concern
# Name of the environment variable holding the encryption secret.
# secret_env = "BATON_SECRET"

[build]
working_dir = "work"
# full = false
# checkpoint_paths = ["src", "target"]
# package_dir = "dist"
# max_build_time_secs = 21600
# safety_margin_secs = 1800

[stages]
# init = "./configure"
# build = "make -j$(nproc)"
# build_dist = "make dist"
"#;

pub(crate) fn run_config_generate(dest: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let path = std::path::PathBuf::from(dest.unwrap_or("baton.toml"));

    if path.exists() {
        return Err(format!("file already exists: {}", path.display()).into());
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    std::fs::write(&path, STARTER_CONFIG)?;
    println!("Config written to: {}", path.display());
    println!("Edit it to set your artifact store and stage commands.");
    Ok(())
}
