//! Simulated compute service for one account/region scope.
//!
//! Launches and terminates instances in the [`StateStore`] and keeps the
//! scope's launch templates. Instances are running as soon as they are
//! created; there is no pending phase and no capacity limit.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use nimbus_core::config::ComputeConfig;
use nimbus_core::{IdGenerator, ResourceKind, Scope, Tag, instance_tags};
use nimbus_state::{InstanceRecord, InstanceStatus, LaunchTemplate, LaunchTemplateData, StateError, StateStore};
use tracing::{debug, info};

use crate::error::{FleetError, FleetResult};
use crate::provider::{InstanceHandle, InstanceProvisioner, LaunchTemplateResolver};
use crate::types::{GroupIdentifier, LaunchSpecification, LaunchTemplateReference, TemplateVersion};

pub struct SimulatedCompute {
    scope: Scope,
    store: StateStore,
    ids: Arc<IdGenerator>,
    config: ComputeConfig,
    /// Next scope-wide launch index.
    launch_index: AtomicU64,
}

impl SimulatedCompute {
    pub fn new(
        scope: Scope,
        store: StateStore,
        ids: Arc<IdGenerator>,
        config: ComputeConfig,
    ) -> FleetResult<Self> {
        let next = store.max_launch_index()?.map_or(0, |i| i + 1);
        Ok(Self {
            scope,
            store,
            ids,
            config,
            launch_index: AtomicU64::new(next),
        })
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Launch `count` instances from `spec`, all in one store transaction.
    ///
    /// Instance-scoped tag specifications on `spec` are applied along
    /// with `tags`.
    pub fn run_instances(
        &self,
        spec: &LaunchSpecification,
        count: u32,
        tags: &[Tag],
    ) -> FleetResult<Vec<InstanceRecord>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut all_tags = instance_tags(&spec.tag_specifications);
        all_tags.extend(tags.iter().cloned());

        let availability_zone = spec
            .availability_zone
            .clone()
            .unwrap_or_else(|| self.config.availability_zone_for(&self.scope.region));
        let launched_at = epoch_secs();

        let records: Vec<InstanceRecord> = (0..count)
            .map(|_| InstanceRecord {
                id: self.ids.next(ResourceKind::Instance),
                instance_type: spec.instance_type.clone(),
                image_id: spec.image_id.clone(),
                key_name: spec.key_name.clone(),
                subnet_id: spec.subnet_id.clone(),
                availability_zone: availability_zone.clone(),
                security_group_ids: spec.security_group_ids(),
                tags: all_tags.clone(),
                status: InstanceStatus::Running,
                launch_index: self.launch_index.fetch_add(1, Ordering::Relaxed),
                launched_at,
                terminated_at: None,
            })
            .collect();

        self.store.put_instances(&records)?;
        info!(
            scope = %self.scope,
            instance_type = %spec.instance_type,
            count,
            "instances launched"
        );
        Ok(records)
    }

    /// Terminate instances directly, outside of any fleet request.
    ///
    /// Returns the instances that were running. Unknown and already
    /// terminated ids are ignored.
    pub fn terminate(&self, instance_ids: &[String]) -> FleetResult<Vec<InstanceRecord>> {
        let terminated = self.store.terminate_instances(instance_ids, epoch_secs())?;
        if !terminated.is_empty() {
            info!(scope = %self.scope, count = terminated.len(), "instances terminated");
        }
        Ok(terminated)
    }

    /// Instances in launch order, optionally restricted to `ids`.
    pub fn describe_instances(&self, ids: Option<&[String]>) -> FleetResult<Vec<InstanceRecord>> {
        let all = self.store.list_instances()?;
        Ok(match ids {
            Some(ids) => all.into_iter().filter(|r| ids.contains(&r.id)).collect(),
            None => all,
        })
    }

    // ── Launch templates ───────────────────────────────────────────

    /// Create a template whose version 1 (and default) is `data`.
    pub fn create_launch_template(
        &self,
        name: &str,
        data: LaunchTemplateData,
    ) -> FleetResult<LaunchTemplate> {
        if name.trim().is_empty() {
            return Err(FleetError::invalid("LaunchTemplateName", "must not be empty"));
        }

        let template = LaunchTemplate {
            id: self.ids.next(ResourceKind::LaunchTemplate),
            name: name.to_string(),
            versions: vec![data],
            default_version: 1,
            created_at: epoch_secs(),
        };

        self.store
            .insert_launch_template(&template)
            .map_err(|e| match e {
                StateError::AlreadyExists(name) => FleetError::LaunchTemplateExists(name),
                other => FleetError::State(other),
            })?;

        info!(scope = %self.scope, id = %template.id, name, "launch template created");
        Ok(template)
    }

    /// Append a version to an existing template. Returns the new version
    /// number.
    pub fn create_launch_template_version(
        &self,
        reference: &LaunchTemplateReference,
        data: LaunchTemplateData,
        make_default: bool,
    ) -> FleetResult<u32> {
        let mut template = self.find_template(reference)?;
        template.versions.push(data);
        let version = template.latest_version();
        if make_default {
            template.default_version = version;
        }
        self.store.put_launch_template(&template)?;

        debug!(id = %template.id, version, make_default, "launch template version added");
        Ok(version)
    }

    fn find_template(&self, reference: &LaunchTemplateReference) -> FleetResult<LaunchTemplate> {
        match reference {
            LaunchTemplateReference::Id(id) => self
                .store
                .get_launch_template(id)?
                .ok_or_else(|| FleetError::LaunchTemplateIdNotFound(id.clone())),
            LaunchTemplateReference::Name(name) => self
                .store
                .find_launch_template_by_name(name)?
                .ok_or_else(|| FleetError::LaunchTemplateNameNotFound(name.clone())),
        }
    }
}

impl InstanceProvisioner for SimulatedCompute {
    fn create_instances(
        &self,
        spec: &LaunchSpecification,
        count: u32,
        tags: &[Tag],
    ) -> FleetResult<Vec<InstanceHandle>> {
        let records = self.run_instances(spec, count, tags)?;
        Ok(records.into_iter().map(to_handle).collect())
    }

    fn terminate_instances(&self, instance_ids: &[String]) -> FleetResult<Vec<InstanceHandle>> {
        let records = self.terminate(instance_ids)?;
        Ok(records.into_iter().map(to_handle).collect())
    }

    fn running_instances(&self, instance_ids: &[String]) -> FleetResult<HashSet<String>> {
        let mut running = HashSet::new();
        for id in instance_ids {
            if let Some(record) = self.store.get_instance(id)?
                && record.is_running()
            {
                running.insert(record.id);
            }
        }
        Ok(running)
    }
}

impl LaunchTemplateResolver for SimulatedCompute {
    fn resolve(
        &self,
        reference: &LaunchTemplateReference,
        version: TemplateVersion,
    ) -> FleetResult<LaunchSpecification> {
        let template = self.find_template(reference)?;
        let number = match version {
            TemplateVersion::Default => template.default_version,
            TemplateVersion::Latest => template.latest_version(),
            TemplateVersion::Number(n) => n,
        };
        let data = template
            .version(number)
            .ok_or_else(|| FleetError::LaunchTemplateVersionNotFound {
                template: reference.to_string(),
                version: number.to_string(),
            })?;

        debug!(template = %reference, version = number, "launch template version resolved");
        Ok(spec_from_template(data))
    }
}

fn spec_from_template(data: &LaunchTemplateData) -> LaunchSpecification {
    let mut spec = LaunchSpecification::new(data.instance_type.as_deref().unwrap_or_default());
    spec.image_id = data.image_id.clone();
    spec.key_name = data.key_name.clone();
    spec.subnet_id = data.subnet_id.clone();
    spec.user_data = data.user_data.clone();
    spec.security_groups = data
        .security_group_ids
        .iter()
        .map(|id| GroupIdentifier { group_id: id.clone() })
        .collect();
    spec.tag_specifications = data.tag_specifications.clone();
    spec
}

fn to_handle(record: InstanceRecord) -> InstanceHandle {
    InstanceHandle {
        instance_id: record.id,
        instance_type: record.instance_type,
        subnet_id: record.subnet_id,
        availability_zone: record.availability_zone,
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::TagSpecification;

    fn test_compute() -> SimulatedCompute {
        let scope = Scope::new("123456789012", "us-east-1");
        let store = StateStore::open_in_memory().unwrap();
        let ids = Arc::new(IdGenerator::new("test", scope.clone()));
        SimulatedCompute::new(scope, store, ids, ComputeConfig::default()).unwrap()
    }

    fn web_template() -> LaunchTemplateData {
        LaunchTemplateData {
            image_id: Some("ami-12c6146b".to_string()),
            instance_type: Some("t2.medium".to_string()),
            subnet_id: Some("subnet-1234".to_string()),
            security_group_ids: vec!["sg-123".to_string()],
            tag_specifications: vec![TagSpecification::for_instances(vec![Tag::new("tier", "web")])],
            ..LaunchTemplateData::default()
        }
    }

    #[test]
    fn run_instances_applies_tags_and_default_zone() {
        let compute = test_compute();
        let mut spec = LaunchSpecification::new("t2.small");
        spec.tag_specifications = vec![TagSpecification::for_instances(vec![Tag::new("team", "infra")])];

        let records = compute
            .run_instances(&spec, 2, &[Tag::new("fleet", "sfr-1")])
            .unwrap();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.id.starts_with("i-") && r.id.len() == 19));
        assert_eq!(records[0].availability_zone, "us-east-1a");
        assert_eq!(records[0].tag("team"), Some("infra"));
        assert_eq!(records[1].tag("fleet"), Some("sfr-1"));
        assert_eq!(records[1].launch_index, records[0].launch_index + 1);
        assert_eq!(compute.describe_instances(None).unwrap().len(), 2);
    }

    #[test]
    fn zero_count_launches_nothing() {
        let compute = test_compute();
        let records = compute
            .run_instances(&LaunchSpecification::new("t2.small"), 0, &[])
            .unwrap();
        assert!(records.is_empty());
        assert!(compute.describe_instances(None).unwrap().is_empty());
    }

    #[test]
    fn terminate_and_running_instances() {
        let compute = test_compute();
        let ids: Vec<String> = compute
            .create_instances(&LaunchSpecification::new("t2.small"), 3, &[])
            .unwrap()
            .into_iter()
            .map(|h| h.instance_id)
            .collect();

        let gone = compute.terminate_instances(&ids[..1]).unwrap();
        assert_eq!(gone.len(), 1);
        // Terminating twice reports nothing new.
        assert!(compute.terminate_instances(&ids[..1]).unwrap().is_empty());

        let running = compute.running_instances(&ids).unwrap();
        assert_eq!(running.len(), 2);
        assert!(!running.contains(&ids[0]));
    }

    #[test]
    fn launch_index_continues_across_restarts() {
        let scope = Scope::new("123456789012", "us-east-1");
        let store = StateStore::open_in_memory().unwrap();
        let ids = Arc::new(IdGenerator::new("test", scope.clone()));

        let first = SimulatedCompute::new(scope.clone(), store.clone(), ids.clone(), ComputeConfig::default()).unwrap();
        first.run_instances(&LaunchSpecification::new("t2.small"), 2, &[]).unwrap();

        let second = SimulatedCompute::new(scope, store, ids, ComputeConfig::default()).unwrap();
        let records = second.run_instances(&LaunchSpecification::new("t2.small"), 1, &[]).unwrap();
        assert_eq!(records[0].launch_index, 2);
    }

    #[test]
    fn launch_template_resolution() {
        let compute = test_compute();
        let template = compute.create_launch_template("web", web_template()).unwrap();
        assert!(template.id.starts_with("lt-"));

        let by_name = compute
            .resolve(&LaunchTemplateReference::Name("web".to_string()), TemplateVersion::Default)
            .unwrap();
        assert_eq!(by_name.instance_type, "t2.medium");
        assert_eq!(by_name.subnet_id.as_deref(), Some("subnet-1234"));
        assert_eq!(by_name.security_group_ids(), vec!["sg-123"]);
        assert_eq!(by_name.tag_specifications.len(), 1);

        let by_id = compute
            .resolve(&LaunchTemplateReference::Id(template.id.clone()), TemplateVersion::Latest)
            .unwrap();
        assert_eq!(by_id, by_name);
    }

    #[test]
    fn template_versions() {
        let compute = test_compute();
        compute.create_launch_template("web", web_template()).unwrap();
        let reference = LaunchTemplateReference::Name("web".to_string());

        let v2 = LaunchTemplateData {
            instance_type: Some("t2.large".to_string()),
            ..web_template()
        };
        assert_eq!(compute.create_launch_template_version(&reference, v2, false).unwrap(), 2);

        let latest = compute.resolve(&reference, TemplateVersion::Latest).unwrap();
        let default = compute.resolve(&reference, TemplateVersion::Default).unwrap();
        let first = compute.resolve(&reference, TemplateVersion::Number(1)).unwrap();
        assert_eq!(latest.instance_type, "t2.large");
        assert_eq!(default.instance_type, "t2.medium");
        assert_eq!(first.instance_type, "t2.medium");

        let err = compute.resolve(&reference, TemplateVersion::Number(7)).unwrap_err();
        assert!(matches!(err, FleetError::LaunchTemplateVersionNotFound { .. }));
    }

    #[test]
    fn unknown_and_duplicate_templates() {
        let compute = test_compute();
        compute.create_launch_template("web", web_template()).unwrap();

        let err = compute.create_launch_template("web", web_template()).unwrap_err();
        assert!(matches!(err, FleetError::LaunchTemplateExists(_)));

        let err = compute
            .resolve(&LaunchTemplateReference::Name("nope".to_string()), TemplateVersion::Default)
            .unwrap_err();
        assert!(matches!(err, FleetError::LaunchTemplateNameNotFound(_)));

        let err = compute
            .resolve(&LaunchTemplateReference::Id("lt-0000".to_string()), TemplateVersion::Default)
            .unwrap_err();
        assert!(matches!(err, FleetError::LaunchTemplateIdNotFound(_)));
    }
}
