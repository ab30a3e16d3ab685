//! Project manifest sanity checks
//!
//! Problems are reported as [`PackagerEvent::Stderr`] lines, never as errors:
//! a broken package.json must not stop the packager or the manifest endpoint.
//! Checks run in order and the first failure ends the run.

use std::path::Path;

use crate::events::{EventBus, PackagerEvent};
use crate::services::{ExpApi, ManifestSource};

/// Marker in the `react-native` dependency version identifying the supported fork
pub const FORKED_REACT_NATIVE: &str = "exponentjs/react-native#";

/// SDK version accepted without a remote lookup
pub const UNVERSIONED_SDK: &str = "UNVERSIONED";

/// Outcome of a validation run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Ok,
    /// A warning was reported; the project is usable
    Warning(String),
    /// An error was reported
    Failed(String),
}

/// Validate the project's package.json and report the first problem on `events`.
pub async fn validate_package_json<E>(env: &E, root: &Path, events: &EventBus) -> Validation
where
    E: ManifestSource + ExpApi + Sync,
{
    let outcome = check_package_json(env, root).await;
    match &outcome {
        Validation::Ok => tracing::debug!("package.json looks good"),
        Validation::Warning(line) | Validation::Failed(line) => {
            tracing::warn!("{}", line);
            events.emit(PackagerEvent::stderr(line.clone()));
        }
    }
    outcome
}

async fn check_package_json<E>(env: &E, root: &Path) -> Validation
where
    E: ManifestSource + ExpApi + Sync,
{
    let pkg = match env.read_manifest(root).await {
        Ok(Some(pkg)) => pkg,
        Ok(None) => return fail("Error: Can't find package.json"),
        Err(e) => return fail(format!("Error: Can't read package.json: {}", e)),
    };

    let Some(react_native) = pkg.dependency("react-native") else {
        return fail("Error: Can't find react-native in package.json dependencies");
    };

    if !react_native.contains(FORKED_REACT_NATIVE) {
        return fail("Error: Must use Exponent fork of react-native. See https://exponentjs.com/help");
    }

    let Some(sdk_version) = pkg.sdk_version() else {
        return fail(
            "Error: Can't find key exp.sdkVersion in package.json. See https://exponentjs.com/help",
        );
    };

    if sdk_version == UNVERSIONED_SDK {
        return Validation::Warning(
            "Warning: Using unversioned Exponent SDK. Do not publish until you set sdkVersion in package.json"
                .to_string(),
        );
    }

    let tag = react_native
        .rsplit_once('#')
        .map(|(_, tag)| tag)
        .unwrap_or(react_native);

    let versions = match env.sdk_versions().await {
        Ok(versions) => versions,
        Err(e) => {
            tracing::debug!("sdk version lookup failed: {}", e);
            return fail("Error: Couldn't connect to server");
        }
    };

    let Some(expected) = versions.get(sdk_version) else {
        let options: Vec<&str> = versions.keys().map(String::as_str).collect();
        return fail(format!(
            "Error: Invalid sdkVersion. Valid options are {}",
            options.join(", ")
        ));
    };

    if expected.expected_tag_name != tag {
        return fail(format!(
            "Error: Invalid version of react-native for sdkVersion {}. Use github:{}{}",
            sdk_version, FORKED_REACT_NATIVE, expected.expected_tag_name
        ));
    }

    Validation::Ok
}

fn fail(line: impl Into<String>) -> Validation {
    Validation::Failed(line.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{package_json_with_sdk, MockEnvironment};
    use crate::types::{PackageJson, SdkVersionInfo};
    use std::collections::BTreeMap;

    fn sdk_table(entries: &[(&str, &str)]) -> BTreeMap<String, SdkVersionInfo> {
        entries
            .iter()
            .map(|(version, tag)| {
                (
                    version.to_string(),
                    SdkVersionInfo {
                        expected_tag_name: tag.to_string(),
                    },
                )
            })
            .collect()
    }

    async fn run(env: &MockEnvironment) -> (Validation, Vec<PackagerEvent>) {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let outcome = validate_package_json(env, Path::new("/work/app"), &events).await;
        let mut emitted = Vec::new();
        while let Ok(event) = rx.try_recv() {
            emitted.push(event);
        }
        (outcome, emitted)
    }

    #[tokio::test]
    async fn test_valid_project_emits_nothing() {
        let env = MockEnvironment::with_sdk_version("10.0.0");
        env.set_sdk_versions(sdk_table(&[("10.0.0", "sdk-10.0.0")]));

        let (outcome, events) = run(&env).await;
        assert_eq!(outcome, Validation::Ok);
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_missing_package_json() {
        let env = MockEnvironment::new();
        let (outcome, events) = run(&env).await;
        assert_eq!(outcome, fail("Error: Can't find package.json"));
        assert_eq!(
            events,
            vec![PackagerEvent::stderr("Error: Can't find package.json")]
        );
    }

    #[tokio::test]
    async fn test_missing_react_native() {
        let env = MockEnvironment::new();
        env.set_manifest(PackageJson::default());
        let (outcome, _) = run(&env).await;
        assert!(matches!(outcome, Validation::Failed(line) if line.contains("Can't find react-native")));
    }

    #[tokio::test]
    async fn test_upstream_react_native_is_rejected() {
        let env = MockEnvironment::new();
        env.set_manifest(
            serde_json::from_value(serde_json::json!({
                "dependencies": { "react-native": "0.24.0" },
                "exp": { "sdkVersion": "10.0.0" }
            }))
            .unwrap(),
        );
        let (outcome, _) = run(&env).await;
        assert!(matches!(outcome, Validation::Failed(line) if line.contains("Must use Exponent fork")));
    }

    #[tokio::test]
    async fn test_missing_sdk_version() {
        let env = MockEnvironment::new();
        env.set_manifest(
            serde_json::from_value(serde_json::json!({
                "dependencies": { "react-native": "github:exponentjs/react-native#sdk-10.0.0" }
            }))
            .unwrap(),
        );
        let (outcome, _) = run(&env).await;
        assert!(matches!(outcome, Validation::Failed(line) if line.contains("exp.sdkVersion")));
    }

    #[tokio::test]
    async fn test_unversioned_is_a_warning_without_api_call() {
        let env = MockEnvironment::with_sdk_version(UNVERSIONED_SDK);
        let (outcome, events) = run(&env).await;
        assert!(matches!(outcome, Validation::Warning(_)));
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_api_unreachable() {
        let env = MockEnvironment::with_sdk_version("10.0.0");
        let (outcome, _) = run(&env).await;
        assert_eq!(outcome, fail("Error: Couldn't connect to server"));
    }

    #[tokio::test]
    async fn test_unknown_sdk_version_lists_options() {
        let env = MockEnvironment::with_sdk_version("99.0.0");
        env.set_sdk_versions(sdk_table(&[("10.0.0", "sdk-10"), ("11.0.0", "sdk-11")]));
        let (outcome, _) = run(&env).await;
        assert_eq!(
            outcome,
            fail("Error: Invalid sdkVersion. Valid options are 10.0.0, 11.0.0")
        );
    }

    #[tokio::test]
    async fn test_tag_mismatch() {
        let env = MockEnvironment::new();
        let mut pkg = package_json_with_sdk("10.0.0");
        pkg.dependencies.as_mut().unwrap().insert(
            "react-native".to_string(),
            "github:exponentjs/react-native#sdk-9.0.0".to_string(),
        );
        env.set_manifest(pkg);
        env.set_sdk_versions(sdk_table(&[("10.0.0", "sdk-10.0.0")]));

        let (outcome, _) = run(&env).await;
        assert_eq!(
            outcome,
            fail("Error: Invalid version of react-native for sdkVersion 10.0.0. Use github:exponentjs/react-native#sdk-10.0.0")
        );
    }
}
