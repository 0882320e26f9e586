//! Minijinja template engine configuration with embedded and auto-reload modes.

#[cfg(feature = "reload")]
use minijinja_autoreload::AutoReloader;

#[cfg(not(feature = "reload"))]
use minijinja::Environment;

#[cfg(feature = "reload")]
/// Build template environment with auto-reloading for development
pub fn build_env(templates_path: String, version: String) -> AutoReloader {
    reload_env::build_env(templates_path, version)
}

#[cfg(not(feature = "reload"))]
/// Build template environment with the templates compiled into the binary
pub fn build_env(_templates_path: String, version: String) -> Environment<'static> {
    embed_env::build_env(version)
}

#[cfg(feature = "reload")]
mod reload_env {
    use minijinja::{Environment, path_loader};
    use minijinja_autoreload::AutoReloader;

    pub fn build_env(templates_path: String, version: String) -> AutoReloader {
        AutoReloader::new(move |notifier| {
            let mut env = Environment::new();
            env.set_trim_blocks(true);
            env.set_lstrip_blocks(true);
            env.add_global("version", version.clone());
            env.set_loader(path_loader(&templates_path));
            notifier.set_fast_reload(true);
            notifier.watch_path(&templates_path, true);
            Ok(env)
        })
    }
}

#[cfg(not(feature = "reload"))]
mod embed_env {
    use minijinja::Environment;

    const TEMPLATES: [(&str, &str); 4] = [
        ("base.html", include_str!("../templates/base.html")),
        ("login.html", include_str!("../templates/login.html")),
        ("consent.html", include_str!("../templates/consent.html")),
        ("error.html", include_str!("../templates/error.html")),
    ];

    pub fn build_env(version: String) -> Environment<'static> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_global("version", version);
        for (name, source) in TEMPLATES {
            if let Err(err) = env.add_template(name, source) {
                tracing::error!(template = name, error = ?err, "failed to load template");
            }
        }
        env
    }

}
