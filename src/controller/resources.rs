//! Kubernetes resource builders for `ImageScan` (C7 step 3-4).
//!
//! Each `ImageScan` owns exactly one scheduled-scan `CronJob`; registry
//! polling (§4.7) additionally launches one-shot `Job`s labeled with a
//! trigger annotation, owned by the same CR.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, Job, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PodSpec, PodTemplateSpec, ResourceRequirements as K8sResources, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use tracing::{info, instrument};

use crate::crd::ImageScan;
use crate::error::{Error, Result};

const OPERATOR_NAME: &str = "imagescan-operator";
const REGISTRY_TRIGGER_ANNOTATION: &str = "security.imagescan.io/triggered-by-registry-poll";

pub fn standard_labels(scan: &ImageScan) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_string(), "imagescan".to_string());
    labels.insert("app.kubernetes.io/instance".to_string(), scan.name_any());
    labels.insert("app.kubernetes.io/managed-by".to_string(), OPERATOR_NAME.to_string());
    labels
}

pub fn owner_reference(scan: &ImageScan) -> OwnerReference {
    OwnerReference {
        api_version: ImageScan::api_version(&()).to_string(),
        kind: ImageScan::kind(&()).to_string(),
        name: scan.name_any(),
        uid: scan.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

pub fn cron_job_name(scan: &ImageScan) -> String {
    format!("{}-scanner", scan.name_any())
}

fn scan_container(scan: &ImageScan, namespace: &str) -> Container {
    let spec = &scan.spec;
    let mut env = vec![
        EnvVar {
            name: "SCAN_IMAGE".to_string(),
            value: Some(spec.image.clone()),
            ..Default::default()
        },
        EnvVar {
            name: "SCAN_SBOM_FORMAT".to_string(),
            value: Some(spec.sbom_format.to_string()),
            ..Default::default()
        },
        EnvVar {
            name: "SCAN_ONLY_FIXABLE".to_string(),
            value: Some(spec.only_fixable.to_string()),
            ..Default::default()
        },
        EnvVar {
            name: "SCAN_IMAGESCAN_NAMESPACE".to_string(),
            value: Some(namespace.to_string()),
            ..Default::default()
        },
        EnvVar {
            name: "SCAN_IMAGESCAN_NAME".to_string(),
            value: Some(scan.name_any()),
            ..Default::default()
        },
    ];

    if let Some(endpoint) = &spec.api_endpoint {
        env.push(EnvVar {
            name: "SCAN_API_ENDPOINT".to_string(),
            value: Some(endpoint.clone()),
            ..Default::default()
        });
    }
    if let Some(sla) = &spec.sla {
        env.push(EnvVar {
            name: "SCAN_SLA_CRITICAL".to_string(),
            value: Some(sla.critical.to_string()),
            ..Default::default()
        });
        env.push(EnvVar {
            name: "SCAN_SLA_HIGH".to_string(),
            value: Some(sla.high.to_string()),
            ..Default::default()
        });
        env.push(EnvVar {
            name: "SCAN_SLA_MEDIUM".to_string(),
            value: Some(sla.medium.to_string()),
            ..Default::default()
        });
        env.push(EnvVar {
            name: "SCAN_SLA_LOW".to_string(),
            value: Some(sla.low.to_string()),
            ..Default::default()
        });
    }
    if let Some(webhooks) = &spec.webhooks {
        if webhooks.scan_completion.enabled || webhooks.status_change.enabled {
            if let Some(url) = &webhooks.url {
                env.push(EnvVar {
                    name: "SCAN_WEBHOOK_URL".to_string(),
                    value: Some(url.clone()),
                    ..Default::default()
                });
            }
        }
    }

    let volume_mounts = spec
        .image_pull_secrets
        .iter()
        .enumerate()
        .map(|(i, _)| VolumeMount {
            name: format!("pull-secret-{i}"),
            mount_path: format!("/etc/imagescan/pull-secrets/{i}"),
            read_only: Some(true),
            ..Default::default()
        })
        .chain(std::iter::once(VolumeMount {
            name: "workspace".to_string(),
            mount_path: "/workspace".to_string(),
            ..Default::default()
        }))
        .collect();

    Container {
        name: "scanner".to_string(),
        image: Some(
            spec.scanner_image
                .clone()
                .unwrap_or_else(|| "ghcr.io/imagescan/scanner:latest".to_string()),
        ),
        env: Some(env),
        resources: Some(K8sResources {
            requests: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity(spec.resources.requests.cpu.clone())),
                ("memory".to_string(), Quantity(spec.resources.requests.memory.clone())),
            ])),
            limits: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity(spec.resources.limits.cpu.clone())),
                ("memory".to_string(), Quantity(spec.resources.limits.memory.clone())),
            ])),
            ..Default::default()
        }),
        volume_mounts: Some(volume_mounts),
        ..Default::default()
    }
}

fn scan_volumes(scan: &ImageScan) -> Vec<Volume> {
    let mut volumes: Vec<Volume> = scan
        .spec
        .image_pull_secrets
        .iter()
        .enumerate()
        .map(|(i, secret_name)| Volume {
            name: format!("pull-secret-{i}"),
            secret: Some(k8s_openapi::api::core::v1::SecretVolumeSource {
                secret_name: Some(secret_name.clone()),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect();

    volumes.push(Volume {
        name: "workspace".to_string(),
        empty_dir: Some(k8s_openapi::api::core::v1::EmptyDirVolumeSource {
            size_limit: Some(Quantity(scan.spec.workspace_size.clone())),
            ..Default::default()
        }),
        ..Default::default()
    });

    volumes
}

fn job_template(scan: &ImageScan, namespace: &str) -> JobTemplateSpec {
    JobTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(standard_labels(scan)),
            ..Default::default()
        }),
        spec: Some(JobSpec {
            backoff_limit: Some(scan.spec.failed_jobs_history_limit),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(standard_labels(scan)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![scan_container(scan, namespace)],
                    volumes: Some(scan_volumes(scan)),
                    restart_policy: Some("OnFailure".to_string()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
    }
}

fn build_cron_job(scan: &ImageScan, namespace: &str) -> CronJob {
    CronJob {
        metadata: ObjectMeta {
            name: Some(cron_job_name(scan)),
            namespace: Some(namespace.to_string()),
            labels: Some(standard_labels(scan)),
            owner_references: Some(vec![owner_reference(scan)]),
            ..Default::default()
        },
        spec: Some(CronJobSpec {
            schedule: scan.spec.schedule.clone(),
            time_zone: scan.spec.time_zone.clone(),
            suspend: Some(scan.spec.suspend),
            concurrency_policy: Some("Forbid".to_string()),
            successful_jobs_history_limit: Some(scan.spec.successful_jobs_history_limit),
            failed_jobs_history_limit: Some(scan.spec.failed_jobs_history_limit),
            job_template: job_template(scan, namespace),
            ..Default::default()
        }),
        status: None,
    }
}

#[instrument(skip(client, scan), fields(name = %scan.name_any(), namespace = scan.namespace()))]
pub async fn ensure_cron_job(client: &Client, scan: &ImageScan) -> Result<()> {
    let namespace = scan.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<CronJob> = Api::namespaced(client.clone(), &namespace);
    let desired = build_cron_job(scan, &namespace);

    api.patch(
        &cron_job_name(scan),
        &PatchParams::apply(OPERATOR_NAME).force(),
        &Patch::Apply(&desired),
    )
    .await
    .map_err(Error::KubeError)?;

    info!(name = %cron_job_name(scan), "ensured scheduled-scan CronJob");
    Ok(())
}

pub async fn delete_cron_job(client: &Client, scan: &ImageScan) -> Result<()> {
    let namespace = scan.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<CronJob> = Api::namespaced(client.clone(), &namespace);

    match api.delete(&cron_job_name(scan), &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(Error::KubeError(e)),
    }
}

/// Launches a one-shot `Job` outside the schedule, used by registry
/// polling when the observed digest changes (spec §4.7).
pub async fn launch_triggered_scan(client: &Client, scan: &ImageScan, digest: &str) -> Result<()> {
    let namespace = scan.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Job> = Api::namespaced(client.clone(), &namespace);

    let mut template = job_template(scan, &namespace);
    if let Some(spec) = &mut template.spec {
        if let Some(container) = spec.template.spec.as_mut().and_then(|p| p.containers.first_mut()) {
            if let Some(env) = &mut container.env {
                env.push(EnvVar {
                    name: "SCAN_TRIGGER_DIGEST".to_string(),
                    value: Some(digest.to_string()),
                    ..Default::default()
                });
            }
        }
    }

    let mut annotations = BTreeMap::new();
    annotations.insert(REGISTRY_TRIGGER_ANNOTATION.to_string(), digest.to_string());

    let job = Job {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-poll-", scan.name_any())),
            namespace: Some(namespace),
            labels: Some(standard_labels(scan)),
            annotations: Some(annotations),
            owner_references: Some(vec![owner_reference(scan)]),
            ..Default::default()
        },
        spec: template.spec,
        status: None,
    };

    api.create(&PostParams::default(), &job)
        .await
        .map_err(Error::KubeError)?;
    info!(name = %scan.name_any(), digest, "launched registry-triggered scan job");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ImageScanSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta as K8sObjectMeta;

    fn test_scan(name: &str) -> ImageScan {
        ImageScan {
            metadata: K8sObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                uid: Some("abc-123".to_string()),
                ..Default::default()
            },
            spec: ImageScanSpec {
                image: "docker.io/nginx:latest".to_string(),
                schedule: "0 3 * * *".to_string(),
                time_zone: None,
                sbom_format: Default::default(),
                suspend: false,
                successful_jobs_history_limit: 3,
                failed_jobs_history_limit: 3,
                resources: Default::default(),
                workspace_size: "10Gi".to_string(),
                api_endpoint: None,
                scanner_image: None,
                webhooks: None,
                image_pull_secrets: Vec::new(),
                only_fixable: false,
                sla: None,
                registry_poll: Default::default(),
            },
            status: None,
        }
    }

    #[test]
    fn test_cron_job_name_is_deterministic() {
        let scan = test_scan("nginx-scan");
        assert_eq!(cron_job_name(&scan), "nginx-scan-scanner");
    }

    #[test]
    fn test_standard_labels_identify_the_owning_scan() {
        let scan = test_scan("nginx-scan");
        let labels = standard_labels(&scan);
        assert_eq!(labels.get("app.kubernetes.io/instance"), Some(&"nginx-scan".to_string()));
        assert_eq!(labels.get("app.kubernetes.io/managed-by"), Some(&OPERATOR_NAME.to_string()));
    }

    #[test]
    fn test_owner_reference_is_a_controller_ref() {
        let scan = test_scan("nginx-scan");
        let owner = owner_reference(&scan);
        assert_eq!(owner.name, "nginx-scan");
        assert_eq!(owner.uid, "abc-123");
        assert_eq!(owner.controller, Some(true));
        assert_eq!(owner.block_owner_deletion, Some(true));
    }

    #[test]
    fn test_build_cron_job_carries_schedule_and_suspend() {
        let scan = test_scan("nginx-scan");
        let cron_job = build_cron_job(&scan, "default");

        assert_eq!(cron_job.metadata.name.as_deref(), Some("nginx-scan-scanner"));
        let spec = cron_job.spec.expect("cron job spec present");
        assert_eq!(spec.schedule, "0 3 * * *");
        assert_eq!(spec.suspend, Some(false));
        assert_eq!(spec.concurrency_policy.as_deref(), Some("Forbid"));

        let pod_spec = spec
            .job_template
            .spec
            .expect("job spec present")
            .template
            .spec
            .expect("pod spec present");
        assert_eq!(pod_spec.containers.len(), 1);
        assert_eq!(pod_spec.containers[0].name, "scanner");
    }

    #[test]
    fn test_scan_container_carries_sla_env_when_configured() {
        let mut scan = test_scan("nginx-scan");
        scan.spec.sla = Some(crate::crd::SlaConfig {
            critical: 1,
            high: 7,
            medium: 30,
            low: 90,
        });
        let container = scan_container(&scan, "default");
        let env = container.env.expect("env present");
        assert!(env.iter().any(|e| e.name == "SCAN_SLA_CRITICAL" && e.value.as_deref() == Some("1")));
    }

    #[test]
    fn test_scan_volumes_includes_one_volume_per_pull_secret_plus_workspace() {
        let mut scan = test_scan("nginx-scan");
        scan.spec.image_pull_secrets = vec!["regcred-a".to_string(), "regcred-b".to_string()];
        let volumes = scan_volumes(&scan);
        assert_eq!(volumes.len(), 3);
        assert_eq!(volumes.last().unwrap().name, "workspace");
    }
}
