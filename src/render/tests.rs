//! Tests for template rendering and the staging directory layout.

use super::*;
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct RenderFixture {
    _tmp: TempDir,
    template_dir: Utf8PathBuf,
    staging_dir: Utf8PathBuf,
}

#[fixture]
fn render_fixture() -> RenderFixture {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
    let template_dir = root.join("confs");
    std::fs::create_dir_all(&template_dir).unwrap_or_else(|err| panic!("mkdir confs: {err}"));
    std::fs::write(
        template_dir.join("nginx.conf"),
        "location /{{ PROJECT_SLUG }}/ { proxy_pass {{ DEPLOYMENT_TARGET }}; }\n",
    )
    .unwrap_or_else(|err| panic!("write template: {err}"));
    std::fs::write(
        template_dir.join("app.ini"),
        "password = {{ LOOKUP_DB_PASSWORD }}\n",
    )
    .unwrap_or_else(|err| panic!("write template: {err}"));

    RenderFixture {
        _tmp: tmp,
        staging_dir: root.join("confs").join("rendered"),
        template_dir,
    }
}

fn context() -> RenderContext {
    let mut ctx = RenderContext::new();
    ctx.insert("PROJECT_SLUG", "lookup");
    ctx.insert("DEPLOYMENT_TARGET", "staging");
    ctx
}

fn nginx() -> ServiceSpec {
    ServiceSpec::new("nginx", "/etc/nginx/locations-enabled", "conf")
        .unwrap_or_else(|err| panic!("nginx spec: {err}"))
}

#[rstest]
fn render_writes_project_prefixed_file(render_fixture: RenderFixture) {
    let renderer = ConfRenderer::new(
        JinjaEngine::new(),
        render_fixture.template_dir.clone(),
        render_fixture.staging_dir.clone(),
        "lookup",
    );

    let rendered = renderer
        .render(&nginx(), &context())
        .unwrap_or_else(|err| panic!("render nginx: {err}"));

    assert_eq!(
        rendered.local_path,
        render_fixture.staging_dir.join("lookup.nginx.conf")
    );
    let on_disk = std::fs::read(&rendered.local_path)
        .unwrap_or_else(|err| panic!("read rendered file: {err}"));
    assert_eq!(on_disk, rendered.content);
    assert!(String::from_utf8_lossy(&on_disk).contains("location /lookup/"));
}

#[rstest]
fn rendering_twice_is_stable(render_fixture: RenderFixture) {
    let renderer = ConfRenderer::new(
        JinjaEngine::new(),
        render_fixture.template_dir.clone(),
        render_fixture.staging_dir.clone(),
        "lookup",
    );

    let first = renderer
        .render(&nginx(), &context())
        .unwrap_or_else(|err| panic!("first render: {err}"));
    let second = renderer
        .render(&nginx(), &context())
        .unwrap_or_else(|err| panic!("second render: {err}"));

    assert_eq!(first, second);
}

#[rstest]
fn missing_keys_fail_instead_of_rendering_blank(render_fixture: RenderFixture) {
    let renderer = ConfRenderer::new(
        JinjaEngine::new(),
        render_fixture.template_dir.clone(),
        render_fixture.staging_dir.clone(),
        "lookup",
    );
    let mut ctx = RenderContext::new();
    ctx.insert("PROJECT_SLUG", "lookup");

    let err = renderer
        .render(&nginx(), &ctx)
        .expect_err("DEPLOYMENT_TARGET is missing");

    assert!(err.is_missing_context_key(), "unexpected error: {err}");
    assert!(!render_fixture.staging_dir.join("lookup.nginx.conf").exists());
}

#[rstest]
fn secrets_render_but_stay_redacted_in_debug(render_fixture: RenderFixture) {
    let renderer = ConfRenderer::new(
        JinjaEngine::new(),
        render_fixture.template_dir.clone(),
        render_fixture.staging_dir.clone(),
        "lookup",
    );
    let spec = ServiceSpec::new("app", "/etc/init", "ini")
        .unwrap_or_else(|err| panic!("app spec: {err}"));
    let mut ctx = RenderContext::new();
    ctx.insert_secret("LOOKUP_DB_PASSWORD", Secret::new("s3cret"));

    let rendered = renderer
        .render(&spec, &ctx)
        .unwrap_or_else(|err| panic!("render app: {err}"));

    assert_eq!(String::from_utf8_lossy(&rendered.content), "password = s3cret");
    assert!(!format!("{ctx:?}").contains("s3cret"));
}

#[rstest]
fn missing_template_is_an_io_error(render_fixture: RenderFixture) {
    let renderer = ConfRenderer::new(
        JinjaEngine::new(),
        render_fixture.template_dir.clone(),
        render_fixture.staging_dir.clone(),
        "lookup",
    );
    let spec = ServiceSpec::new("uwsgi", "/etc/init", "conf")
        .unwrap_or_else(|err| panic!("uwsgi spec: {err}"));

    let err = renderer
        .render(&spec, &context())
        .expect_err("uwsgi template does not exist");

    assert!(matches!(err, RenderError::Io { .. }), "unexpected error: {err}");
}

#[rstest]
fn malformed_templates_are_reported() {
    let engine = JinjaEngine::new();

    let err = engine
        .render_template("{% if %}", &RenderContext::new())
        .expect_err("syntax error");

    assert!(matches!(err, TemplateError::Malformed { .. }));
}
