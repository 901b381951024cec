//! Installer Job generation.
//!
//! The job runs two containers in sequence:
//! - `package-copy` (init) runs the package image and copies its registry
//!   directory into a shared `emptyDir`
//! - `package-unpack` runs the executor image, which reads the copied
//!   contents and prints the package manifests to stdout
//!
//! The job never retries on its own (`backoffLimit: 0`); a failed job is
//! reported on the InstallRequest instead.

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, PodSpec, PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::crd::InstallRequest;
use crate::resources::common::{owner_reference, standard_labels};

/// Init container copying the package contents
pub const COPY_CONTAINER: &str = "package-copy";
/// Container printing the package manifests
pub const UNPACK_CONTAINER: &str = "package-unpack";
/// Shared volume holding the copied package contents
pub const PACKAGE_VOLUME: &str = "package-contents";
/// Mount path of the shared volume in both containers
pub const PACKAGE_MOUNT_PATH: &str = "/ext-pkg";
/// Directory holding the package contents inside the package image
const REGISTRY_DIR: &str = "/.registry";

/// Name of the installer job for a request.
pub fn job_name(request: &InstallRequest) -> String {
    request.name_any()
}

/// Generate the installer job for an InstallRequest.
pub fn generate_install_job(request: &InstallRequest, executor_image: &str) -> Job {
    let labels = standard_labels(request);
    let package_image = request.spec.package_image();

    Job {
        metadata: ObjectMeta {
            name: Some(job_name(request)),
            namespace: request.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(request)]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    init_containers: Some(vec![Container {
                        name: COPY_CONTAINER.to_string(),
                        image: Some(package_image.clone()),
                        command: Some(vec![
                            "cp".to_string(),
                            "-R".to_string(),
                            REGISTRY_DIR.to_string(),
                            format!("{}/", PACKAGE_MOUNT_PATH),
                        ]),
                        volume_mounts: Some(volume_mounts()),
                        ..Default::default()
                    }]),
                    containers: vec![Container {
                        name: UNPACK_CONTAINER.to_string(),
                        image: Some(executor_image.to_string()),
                        args: Some(vec![
                            "unpack".to_string(),
                            format!("--content-dir={}{}", PACKAGE_MOUNT_PATH, REGISTRY_DIR),
                        ]),
                        env: Some(generate_env_vars(request, &package_image)),
                        volume_mounts: Some(volume_mounts()),
                        ..Default::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: PACKAGE_VOLUME.to_string(),
                        empty_dir: Some(EmptyDirVolumeSource::default()),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

fn generate_env_vars(request: &InstallRequest, package_image: &str) -> Vec<EnvVar> {
    let var = |name: &str, value: String| EnvVar {
        name: name.to_string(),
        value: Some(value),
        ..Default::default()
    };
    vec![
        var("PACKAGE", request.spec.package.clone()),
        var("SOURCE", request.spec.source.clone().unwrap_or_default()),
        var("PACKAGE_IMAGE", package_image.to_string()),
    ]
}

fn volume_mounts() -> Vec<VolumeMount> {
    vec![VolumeMount {
        name: PACKAGE_VOLUME.to_string(),
        mount_path: PACKAGE_MOUNT_PATH.to_string(),
        ..Default::default()
    }]
}
