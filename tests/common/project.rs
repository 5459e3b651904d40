//! Shared project fixture for integration tests.
//!
//! Include it with:
//!
//! ```rust
//! #[path = "common/project.rs"]
//! mod project;
//! ```

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use deckhand::artifacts::PartitionRules;
use deckhand::deploy::{DEFAULT_GIT_REMOTE, DeployPlan, STABLE_BRANCH};
use deckhand::{
    AppRuntime, ConfReconciler, ConfRenderer, Environment, JinjaEngine, RemoteTransport,
    RenderContext, ServerLayout, ServiceSpec,
};
use tempfile::TempDir;

/// Project name used throughout the fixtures.
pub const PROJECT: &str = "lookup";

/// Installed nginx configuration path.
pub const NGINX_PATH: &str = "/etc/nginx/locations-enabled/lookup.nginx.conf";

/// Installed uwsgi configuration path.
pub const UWSGI_PATH: &str = "/etc/init/lookup.uwsgi.conf";

/// A project checkout in a temporary directory: templates plus a static
/// build.
pub struct ProjectDir {
    _tmp: TempDir,
    /// Checkout root.
    pub root: Utf8PathBuf,
}

impl ProjectDir {
    /// Creates templates for nginx and uwsgi and an empty static tree.
    pub fn new() -> Self {
        let tmp = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 temp dir");
        let project = Self { _tmp: tmp, root };
        project.write(
            "confs/nginx.conf",
            "location /{{ PROJECT_SLUG }}/ {\n    proxy_pass http://{{ SERVER_NAME }};\n}\n# {{ DEPLOYMENT_TARGET }}\n",
        );
        project.write(
            "confs/uwsgi.conf",
            "env DEPLOYMENT_TARGET={{ DEPLOYMENT_TARGET }}\nexec uwsgi --socket /tmp/lookup.uwsgi.sock\n",
        );
        project
    }

    /// Writes `content` to `relative`, creating parent directories.
    pub fn write(&self, relative: &str, content: &str) {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, content).expect("write fixture file");
    }

    /// Absolute path of `relative`.
    pub fn path(&self, relative: &str) -> Utf8PathBuf {
        self.root.join(relative)
    }

    /// Renders straight from the fixture templates.
    pub fn renderer(&self) -> ConfRenderer<JinjaEngine> {
        ConfRenderer::new(
            JinjaEngine::new(),
            self.path("confs"),
            self.path("confs/rendered"),
            PROJECT,
        )
    }

    /// Values every template needs except the deployment target.
    pub fn context() -> RenderContext {
        let mut context = RenderContext::new();
        context.insert("PROJECT_SLUG", PROJECT);
        context.insert("SERVER_NAME", "127.0.0.1:8001");
        context
    }

    /// Reconciler over nginx and uwsgi.
    pub fn reconciler<T: RemoteTransport>(&self, transport: T) -> ConfReconciler<JinjaEngine, T> {
        ConfReconciler::new(
            self.renderer(),
            transport,
            services(),
            AppRuntime::for_project(PROJECT),
            Self::context(),
        )
        .expect("unique services")
    }

    /// Plan syncing `.gzip` with HTML and CSS gzip-encoded.
    pub fn plan(&self) -> DeployPlan {
        DeployPlan {
            deploy_crontab: true,
            deploy_services: true,
            stable_branch: String::from(STABLE_BRANCH),
            git_remote: String::from(DEFAULT_GIT_REMOTE),
            source_root: self.path("www"),
            build_root: self.path(".gzip"),
            assets_root: self.path("www/assets"),
            prefix: String::from(PROJECT),
            rules: PartitionRules::new(vec![String::from("*.html"), String::from("*.css")]),
        }
    }

    /// Writes a small static build into `.gzip`.
    pub fn write_build(&self) {
        for file in ["index.html", "robots.txt", "live-data/feed.json", "sitemap.xml"] {
            self.write(&format!(".gzip/{file}"), file);
        }
        self.write("www/assets/app.js", "app");
    }

    /// Reads a rendered file from the staging directory.
    pub fn rendered(&self, file_name: &str) -> String {
        fs::read_to_string(self.path("confs/rendered").join(file_name)).expect("rendered file")
    }

    /// Returns `true` when `relative` exists.
    pub fn exists(&self, relative: &str) -> bool {
        Utf8Path::exists(&self.path(relative))
    }
}

/// nginx then uwsgi.
pub fn services() -> Vec<ServiceSpec> {
    vec![
        ServiceSpec::new("nginx", "/etc/nginx/locations-enabled", "conf").expect("nginx spec"),
        ServiceSpec::new("uwsgi", "/etc/init", "conf").expect("uwsgi spec"),
    ]
}

/// An environment with `hosts`, deploying to them when `remote` is set.
pub fn environment(name: &str, hosts: &[&str], remote: bool, branch: &str) -> Environment {
    let mut environment = Environment::new(name);
    environment.hosts = hosts.iter().map(|host| (*host).to_owned()).collect();
    environment.deploy_to_servers = remote;
    environment.branch = branch.to_owned();
    environment.buckets = vec![format!("{name}.example.org")];
    environment
}

/// Server layout for the fixture project.
pub fn layout() -> ServerLayout {
    ServerLayout::for_project(PROJECT, "ubuntu", "git@example.org:apps/lookup.git")
}
