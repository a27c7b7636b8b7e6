//! End-to-end convergence passes against the mock platform.
//!
//! Each test drives `engine::converge` the way the CLI does and inspects the
//! resulting platform state.

use std::collections::BTreeSet;
use std::path::Path;

use branchroute::core::config::Config;
use branchroute::core::types::{BranchName, CodeDigest, VersionId};
use branchroute::engine::{converge, ConvergeError, Context, PassOptions, PassReport, PassStage};
use branchroute::platform::memory::{ApiRecord, PlatformState};
use branchroute::platform::mock::{FailOn, MockPlatform, Op};
use branchroute::platform::{Platform, PlatformError};

const HEADER: &str = r#"
project = "email"
stack = "dev"
region = "us-east-1"
"#;

const MAIN: &str = r#"
[[branches]]
name = "main"
version_label = "v1"
"#;

const BETA: &str = r#"
[[branches]]
name = "beta"
version_label = "v2"
"#;

/// Takes over beta's version label.
const GAMMA: &str = r#"
[[branches]]
name = "gamma"
version_label = "v2"
"#;

const FUNCTION: &str = "email-dev";

fn context(mock: &MockPlatform, branches: &[&str]) -> Context {
    let text = format!("{}{}", HEADER, branches.concat());
    let config = Config::from_toml_str(&text, Path::new("branchroute.toml")).unwrap();
    Context::new(config, Platform::from_shared(mock.clone()))
}

async fn pass(
    ctx: &Context,
    current: &str,
    bundle: Option<&[u8]>,
) -> Result<PassReport, ConvergeError> {
    let options = PassOptions {
        current: Some(current.to_string()),
        artifact: bundle.map(CodeDigest::of_bytes),
    };
    converge(ctx, &options).await
}

fn name(s: &str) -> BranchName {
    BranchName::new(s).unwrap()
}

fn alias(state: &PlatformState, branch: &str) -> Option<String> {
    state.functions[FUNCTION]
        .aliases
        .get(&name(branch))
        .map(|v| v.to_string())
}

fn api(state: &PlatformState) -> &ApiRecord {
    state.apis.values().next().expect("api exists")
}

/// Promote main, then beta, with the same bundle: both end up on version 1.
async fn both_deployed(mock: &MockPlatform, bundle: &[u8]) -> PassReport {
    pass(&context(mock, &[MAIN]), "main", Some(bundle))
        .await
        .unwrap();
    pass(&context(mock, &[MAIN, BETA]), "beta", Some(bundle))
        .await
        .unwrap()
}

mod first_deploy {
    use super::*;

    #[tokio::test]
    async fn never_deployed_branch_blocks_deployment() {
        let mock = MockPlatform::new("us-east-1");
        let ctx = context(&mock, &[MAIN, BETA]);

        let err = pass(&ctx, "main", Some(b"bundle")).await.unwrap_err();

        assert_eq!(err, ConvergeError::NeverDeployed { branch: name("beta") });
        assert_eq!(err.stage(), Some(PassStage::Alias));
        assert!(err.to_string().contains("never deployed"));

        let state = mock.state();
        assert_eq!(alias(&state, "main").as_deref(), Some("1"));
        assert_eq!(alias(&state, "beta"), None);
        assert_eq!(mock.count(Op::CreateDeployment), 0);
        assert_eq!(mock.count(Op::PutStage), 0);
    }

    #[tokio::test]
    async fn resolution_failure_becomes_never_deployed() {
        let mock = MockPlatform::new("us-east-1");
        both_deployed(&mock, b"bundle").await;
        mock.add_failure(FailOn::new(Op::GetAlias, PlatformError::Throttled).for_subject("beta"));

        let err = pass(&context(&mock, &[MAIN, BETA]), "main", None)
            .await
            .unwrap_err();

        // beta is deployed, but its binding could not be read: it resolves to
        // the sentinel and the provider error never reaches the caller.
        assert_eq!(err, ConvergeError::NeverDeployed { branch: name("beta") });
        assert_eq!(alias(&mock.state(), "beta").as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn promoting_a_branch_once_unblocks_it() {
        let mock = MockPlatform::new("us-east-1");
        let report = both_deployed(&mock, b"bundle").await;

        assert_eq!(report.current, name("beta"));
        assert!(report.deployment.is_created());
        let state = mock.state();
        assert_eq!(alias(&state, "main").as_deref(), Some("1"));
        assert_eq!(alias(&state, "beta").as_deref(), Some("1"));
    }
}

mod idempotence {
    use super::*;

    #[tokio::test]
    async fn unchanged_code_is_noop() {
        let mock = MockPlatform::new("us-east-1");
        let ctx = context(&mock, &[MAIN, BETA]);
        let setup = both_deployed(&mock, b"bundle").await;
        let deployments = mock.count(Op::CreateDeployment);

        let first = pass(&ctx, "main", Some(b"bundle")).await.unwrap();
        let second = pass(&ctx, "main", None).await.unwrap();

        assert_eq!(first.trigger, setup.trigger);
        assert_eq!(second.trigger, first.trigger);
        assert!(!first.deployment.is_created());
        assert!(!second.deployment.is_created());
        assert_eq!(
            second.deployment.deployment_id(),
            setup.deployment.deployment_id()
        );
        assert_eq!(mock.count(Op::CreateDeployment), deployments);

        let urls: Vec<&str> = second
            .outputs
            .endpoints
            .iter()
            .map(|e| e.url.as_str())
            .collect();
        assert_eq!(urls.len(), 2);
        assert!(urls[0].ends_with("/dev/api/v1/generate-email"));
        assert!(urls[1].ends_with("/dev/api/v2/generate-email"));
    }

    #[tokio::test]
    async fn no_new_version_for_same_bundle() {
        let mock = MockPlatform::new("us-east-1");
        let ctx = context(&mock, &[MAIN, BETA]);
        both_deployed(&mock, b"bundle").await;

        let report = pass(&ctx, "main", Some(b"bundle")).await.unwrap();

        assert_eq!(report.function_version.id, VersionId::new("1").unwrap());
        assert_eq!(mock.state().functions[FUNCTION].versions.len(), 1);
    }
}

mod code_change {
    use super::*;

    #[tokio::test]
    async fn redeploys_and_keeps_other_branches() {
        let mock = MockPlatform::new("us-east-1");
        let ctx = context(&mock, &[MAIN, BETA]);
        let before = both_deployed(&mock, b"one").await;

        let after = pass(&ctx, "main", Some(b"two")).await.unwrap();

        assert_ne!(after.trigger, before.trigger);
        assert!(after.deployment.is_created());
        assert_eq!(after.function_version.id, VersionId::new("2").unwrap());

        let state = mock.state();
        assert_eq!(alias(&state, "main").as_deref(), Some("2"));
        assert_eq!(alias(&state, "beta").as_deref(), Some("1"));

        let stage = &api(&state).stages["dev"];
        assert_eq!(stage.deployment_id, after.deployment.deployment_id());
        assert_eq!(stage.variables["function_version"], "2");
        assert_eq!(stage.variables["deployment_trigger"], after.trigger.to_string());
    }

    #[tokio::test]
    async fn reports_pre_pass_bindings() {
        let mock = MockPlatform::new("us-east-1");
        let ctx = context(&mock, &[MAIN, BETA]);
        both_deployed(&mock, b"one").await;

        let report = pass(&ctx, "main", Some(b"two")).await.unwrap();

        let main = &report.branches[0];
        let beta = &report.branches[1];
        assert!(main.is_current);
        assert_eq!(main.resolved.version(), Some(&VersionId::new("1").unwrap()));
        assert_eq!(main.bound_version, VersionId::new("2").unwrap());
        assert!(!beta.is_current);
        assert_eq!(beta.resolved.version(), Some(&beta.bound_version));
    }
}

mod routing {
    use super::*;

    #[tokio::test]
    async fn deployment_covers_every_route() {
        let mock = MockPlatform::new("us-east-1");
        let report = both_deployed(&mock, b"bundle").await;

        let state = mock.state();
        let deployment = api(&state)
            .deployments
            .iter()
            .find(|d| d.id == report.deployment.deployment_id())
            .unwrap();
        let deps: BTreeSet<&str> = deployment.depends_on.iter().map(String::as_str).collect();
        let routes: BTreeSet<&str> = report
            .branches
            .iter()
            .flat_map(|b| b.routes.iter().map(String::as_str))
            .collect();

        assert_eq!(routes.len(), 20);
        assert!(deps.is_superset(&routes));
        assert!(deps.len() > routes.len());
    }

    #[tokio::test]
    async fn permissions_are_qualified_by_own_branch() {
        let mock = MockPlatform::new("us-east-1");
        both_deployed(&mock, b"bundle").await;

        let state = mock.state();
        let permissions = &state.functions[FUNCTION].permissions;
        assert_eq!(permissions.len(), 2);
        for branch in ["main", "beta"] {
            let grant = &permissions[&format!("api-gateway-lambda-permission-{}", branch)];
            assert_eq!(grant.qualifier, name(branch));
            assert_eq!(grant.principal, "apigateway.amazonaws.com");
            assert!(grant.source_arn.ends_with("/*/*"));
        }
    }

    #[tokio::test]
    async fn removed_branch_is_pruned() {
        let mock = MockPlatform::new("us-east-1");
        let before = both_deployed(&mock, b"bundle").await;

        let report = pass(&context(&mock, &[MAIN]), "main", None).await.unwrap();

        assert_eq!(report.pruned, vec![name("beta")]);
        // Same code, smaller route set: still a new snapshot.
        assert_eq!(report.trigger, before.trigger);
        assert!(report.deployment.is_created());

        let state = mock.state();
        let resources = &api(&state).resources;
        assert!(resources.keys().all(|n| !n.ends_with("-beta")));
        assert!(resources.contains_key("version-resource-main"));
        assert!(!state.functions[FUNCTION]
            .permissions
            .contains_key("api-gateway-lambda-permission-beta"));
        // Aliases are left in place.
        assert_eq!(alias(&state, "beta").as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn removed_branch_label_is_reusable() {
        let mock = MockPlatform::new("us-east-1");
        both_deployed(&mock, b"bundle").await;
        let ctx = context(&mock, &[MAIN, GAMMA]);

        let report = pass(&ctx, "gamma", Some(b"bundle")).await.unwrap();

        assert_eq!(report.pruned, vec![name("beta")]);
        assert!(report.deployment.is_created());
        assert!(report.outputs.endpoints[1]
            .url
            .ends_with("/dev/api/v2/generate-email"));
        let state = mock.state();
        let resources = &api(&state).resources;
        assert_eq!(
            resources["version-resource-gamma"].owner.as_ref(),
            Some(&name("gamma"))
        );
        assert!(!resources.contains_key("version-resource-beta"));

        // Converges again without a config change.
        let again = pass(&ctx, "gamma", None).await.unwrap();
        assert!(again.pruned.is_empty());
        assert!(!again.deployment.is_created());
    }

    #[tokio::test]
    async fn prune_runs_before_routing() {
        let mock = MockPlatform::new("us-east-1");
        both_deployed(&mock, b"bundle").await;
        mock.clear_operations();

        pass(&context(&mock, &[MAIN, GAMMA]), "gamma", Some(b"bundle"))
            .await
            .unwrap();

        let ops = mock.operations();
        let last_delete = ops.iter().rposition(|o| o.op == Op::DeleteResource).unwrap();
        let first_alias = ops.iter().position(|o| o.op == Op::PutAlias).unwrap();
        let first_route = ops
            .iter()
            .position(|o| o.op == Op::PutResource && o.subject.ends_with("-gamma"))
            .unwrap();
        assert!(last_delete < first_alias);
        assert!(last_delete < first_route);
    }

    #[tokio::test]
    async fn route_failure_aborts_before_deploy() {
        let mock = MockPlatform::new("us-east-1");
        both_deployed(&mock, b"one").await;
        let deployments = mock.count(Op::CreateDeployment);
        mock.add_failure(
            FailOn::new(Op::PutResource, PlatformError::Throttled).for_subject("version-resource-beta"),
        );

        let err = pass(&context(&mock, &[MAIN, BETA]), "main", Some(b"two"))
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(PassStage::Route));
        assert_eq!(err.branch(), Some(&name("beta")));
        assert_eq!(mock.count(Op::CreateDeployment), deployments);
        // The live stage still serves the previous version.
        assert_eq!(api(&mock.state()).stages["dev"].variables["function_version"], "1");
    }
}
