//! MachineSet autoscaling-from-zero annotations.

use machina_cloud::InstanceTypeInfo;
use machina_cloud::fake::stub;
use machina_controller::api::{
    CPU_ANNOTATION, GPU_ANNOTATION, GPU_TYPE_ANNOTATION, GPU_TYPE_NVIDIA, LABELS_ANNOTATION,
    MEMORY_ANNOTATION, MachineSet, ObjectKey,
};
use machina_controller::events::REASON_FAILED_UPDATE;
use machina_controller::machineset::{UNKNOWN_INSTANCE_TYPE_MESSAGE, reconcile};
use machina_controller::testing::{NAMESPACE, TestEnv};
use std::collections::BTreeMap;

fn instance_type(name: &str, vcpus: i64, memory: i64, gpus: Vec<i64>, arch: &str) -> InstanceTypeInfo {
    InstanceTypeInfo {
        instance_type: name.into(),
        default_vcpus: Some(vcpus),
        memory_mib: Some(memory),
        gpu_counts: gpus,
        supported_architectures: vec![arch.into()],
    }
}

async fn machine_set(env: &TestEnv, name: &str, instance_type: &str, labels: Option<&str>) -> ObjectKey {
    let mut set = MachineSet::new(NAMESPACE, name);
    let mut config = env.provider_config();
    config.instance_type = instance_type.into();
    set.spec.template.spec.provider_spec.value = Some(serde_json::to_value(config).unwrap());
    if let Some(labels) = labels {
        set.metadata
            .annotations
            .insert(LABELS_ANNOTATION.into(), labels.into());
    }
    env.ctx.machine_sets.create(set).await.unwrap().metadata.key()
}

async fn annotations(env: &TestEnv, key: &ObjectKey) -> BTreeMap<String, String> {
    env.ctx
        .machine_sets
        .get(key)
        .await
        .unwrap()
        .unwrap()
        .metadata
        .annotations
}

fn seed_catalog(env: &TestEnv) {
    env.cloud.add_instance_type_page(vec![
        instance_type("p2.16xlarge", 64, 749568, vec![16], "x86_64"),
        instance_type(stub::INSTANCE_TYPE, 4, 16384, vec![], "x86_64"),
    ]);
    env.cloud
        .add_instance_type_page(vec![instance_type("m6g.large", 2, 8192, vec![], "arm64")]);
}

#[tokio::test]
async fn test_gpu_instance_type_annotations() {
    let env = TestEnv::new().await;
    seed_catalog(&env);
    let key = machine_set(&env, "gpu-workers", "p2.16xlarge", None).await;

    reconcile(&env.ctx, &key).await.unwrap();
    let annotations = annotations(&env, &key).await;
    assert_eq!(annotations.get(CPU_ANNOTATION).map(String::as_str), Some("64"));
    assert_eq!(annotations.get(MEMORY_ANNOTATION).map(String::as_str), Some("749568"));
    assert_eq!(annotations.get(GPU_ANNOTATION).map(String::as_str), Some("16"));
    assert_eq!(annotations.get(GPU_TYPE_ANNOTATION).map(String::as_str), Some(GPU_TYPE_NVIDIA));
    assert_eq!(
        annotations.get(LABELS_ANNOTATION).map(String::as_str),
        Some("kubernetes.io/arch=amd64")
    );
    assert!(env.recorder.warnings().is_empty());
}

#[tokio::test]
async fn test_existing_labels_are_merged() {
    let env = TestEnv::new().await;
    seed_catalog(&env);
    let key = machine_set(&env, "arm-workers", "m6g.large", Some("zone=a,kubernetes.io/arch=custom")).await;

    reconcile(&env.ctx, &key).await.unwrap();
    let annotations = annotations(&env, &key).await;
    assert_eq!(
        annotations.get(LABELS_ANNOTATION).map(String::as_str),
        Some("kubernetes.io/arch=custom,zone=a")
    );
    assert_eq!(annotations.get(GPU_ANNOTATION).map(String::as_str), Some("0"));
    assert!(!annotations.contains_key(GPU_TYPE_ANNOTATION));
}

#[tokio::test]
async fn test_unknown_instance_type_emits_one_event() {
    let env = TestEnv::new().await;
    seed_catalog(&env);
    let key = machine_set(&env, "mystery", "x9.huge", None).await;
    let before = env.ctx.machine_sets.get(&key).await.unwrap().unwrap();

    reconcile(&env.ctx, &key).await.unwrap();
    let after = env.ctx.machine_sets.get(&key).await.unwrap().unwrap();
    assert_eq!(after, before);

    let warnings = env.recorder.warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].reason, REASON_FAILED_UPDATE);
    assert_eq!(warnings[0].message, UNKNOWN_INSTANCE_TYPE_MESSAGE);
}

#[tokio::test]
async fn test_catalog_is_fetched_once_per_region() {
    let env = TestEnv::new().await;
    seed_catalog(&env);
    let a = machine_set(&env, "a", "p2.16xlarge", None).await;
    let b = machine_set(&env, "b", "m6g.large", None).await;

    reconcile(&env.ctx, &a).await.unwrap();
    reconcile(&env.ctx, &b).await.unwrap();
    reconcile(&env.ctx, &a).await.unwrap();
    // Two pages, listed once.
    assert_eq!(env.cloud.call_count("DescribeInstanceTypes"), 2);
}
