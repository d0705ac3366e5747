//! Static definitions of the provisionable resource families.
//!
//! A descriptor fixes the field set, the naming rules and the single
//! topological order of a family's steps. Creation walks `steps` forward,
//! deletion walks it backward; nothing about ordering is inferred at runtime.

use crate::error::{Result, SnowUtilsError};
use crate::manifest::{check_field, Field, ResourceInstance, Step};
use crate::naming::NameStyle;
use crate::types::{InstanceStatus, StepStatus};
use chrono::Utc;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Specs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub required: bool,
    /// Template rendered when the caller supplies no value.
    pub default: Option<&'static str>,
    pub style: NameStyle,
    /// Secret values are handed back to the caller and never written to a manifest.
    pub secret: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct StepSpec {
    pub name: &'static str,
    /// Provider-side object type, shown in the manifest step table.
    pub kind: &'static str,
    /// Re-executed by `rotate`.
    pub renewable: bool,
    /// Dropped entirely from exported manifests.
    pub secret: bool,
    /// Shared infrastructure, never compensated.
    pub protected: bool,
}

#[derive(Debug)]
pub struct ResourceDescriptor {
    pub skill_id: &'static str,
    pub title: &'static str,
    /// Field whose value is the instance key.
    pub key_field: &'static str,
    pub fields: &'static [FieldSpec],
    pub steps: &'static [StepSpec],
    /// The whole family is shared infrastructure and can never be deleted.
    pub shared_infrastructure: bool,
}

const fn field(name: &'static str, default: Option<&'static str>, style: NameStyle) -> FieldSpec {
    FieldSpec {
        name,
        required: default.is_none(),
        default,
        style,
        secret: false,
    }
}

const fn secret_field(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        required: false,
        default: None,
        style: NameStyle::Verbatim,
        secret: true,
    }
}

const fn step(name: &'static str, kind: &'static str) -> StepSpec {
    StepSpec {
        name,
        kind,
        renewable: false,
        secret: false,
        protected: false,
    }
}

// ---------------------------------------------------------------------------
// Built-in families
// ---------------------------------------------------------------------------

const PAT_FIELDS: &[FieldSpec] = &[
    field("user", Some("{prefix}_{project}_RUNNER"), NameStyle::Sql),
    field("pat_role", Some("{prefix}_{project}_ACCESS"), NameStyle::Sql),
    field("db", Some("{prefix}_SNOW_UTILS"), NameStyle::Sql),
    field("pat_name", Some("{user}_PAT"), NameStyle::Sql),
    field("network_rule", Some("{user}_NETWORK_RULE"), NameStyle::Sql),
    field("network_policy", Some("{user}_NETWORK_POLICY"), NameStyle::Sql),
    field("auth_policy", Some("{user}_AUTH_POLICY"), NameStyle::Sql),
    field("default_expiry_days", Some("45"), NameStyle::Verbatim),
    field("max_expiry_days", Some("90"), NameStyle::Verbatim),
    field("allowed_cidrs", None, NameStyle::Verbatim),
    secret_field("pat_token"),
];

const PAT_STEPS: &[StepSpec] = &[
    step("service_user", "USER"),
    step("network_rule", "NETWORK RULE"),
    step("network_policy", "NETWORK POLICY"),
    step("policy_assignment", "ALTER USER"),
    step("auth_policy", "AUTHENTICATION POLICY"),
    StepSpec {
        name: "pat",
        kind: "PROGRAMMATIC ACCESS TOKEN",
        renewable: true,
        secret: true,
        protected: false,
    },
];

const NETWORK_FIELDS: &[FieldSpec] = &[
    field("rule_name", Some("{prefix}_{project}_NETWORK_RULE"), NameStyle::Sql),
    field("policy_name", Some("{rule_name}_POLICY"), NameStyle::Sql),
    field("db", Some("{prefix}_SNOW_UTILS"), NameStyle::Sql),
    field("schema", Some("NETWORKS"), NameStyle::Sql),
    field("mode", Some("INGRESS"), NameStyle::Sql),
    field("rule_type", Some("IPV4"), NameStyle::Sql),
    field("values", None, NameStyle::Verbatim),
];

const NETWORK_STEPS: &[StepSpec] = &[
    step("network_rule", "NETWORK RULE"),
    step("network_policy", "NETWORK POLICY"),
];

const VOLUME_FIELDS: &[FieldSpec] = &[
    field("bucket", None, NameStyle::Aws),
    field("volume_name", Some("{prefix}_{bucket}_EXTERNAL_VOLUME"), NameStyle::Sql),
    field("bucket_name", Some("{prefix}-{bucket}"), NameStyle::Aws),
    field("aws_region", Some("us-west-2"), NameStyle::Verbatim),
    field("role_name", Some("{prefix}-{bucket}-snowflake-role"), NameStyle::Aws),
    field("policy_name", Some("{prefix}-{bucket}-snowflake-policy"), NameStyle::Aws),
    field("storage_location", Some("{prefix}_{bucket}_S3_LOCATION"), NameStyle::Sql),
    field("external_id", Some("{prefix}_{bucket}_EXT_{uuid8}"), NameStyle::Sql),
    field("allow_writes", Some("true"), NameStyle::Verbatim),
];

const VOLUME_STEPS: &[StepSpec] = &[
    step("s3_bucket", "S3 BUCKET"),
    step("iam_policy", "IAM POLICY"),
    step("iam_role", "IAM ROLE"),
    step("external_volume", "EXTERNAL VOLUME"),
    step("trust_policy", "IAM TRUST POLICY"),
];

const SETUP_FIELDS: &[FieldSpec] = &[field("db", Some("{prefix}_SNOW_UTILS"), NameStyle::Sql)];

const SETUP_STEPS: &[StepSpec] = &[StepSpec {
    name: "database",
    kind: "DATABASE",
    renewable: false,
    secret: false,
    protected: true,
}];

static BUILTIN: [ResourceDescriptor; 4] = [
    ResourceDescriptor {
        skill_id: "setup",
        title: "Shared snow-utils database",
        key_field: "db",
        fields: SETUP_FIELDS,
        steps: SETUP_STEPS,
        shared_infrastructure: true,
    },
    ResourceDescriptor {
        skill_id: "pat",
        title: "Service user with programmatic access token",
        key_field: "user",
        fields: PAT_FIELDS,
        steps: PAT_STEPS,
        shared_infrastructure: false,
    },
    ResourceDescriptor {
        skill_id: "networks",
        title: "Network rule and policy",
        key_field: "rule_name",
        fields: NETWORK_FIELDS,
        steps: NETWORK_STEPS,
        shared_infrastructure: false,
    },
    ResourceDescriptor {
        skill_id: "volumes",
        title: "S3-backed Iceberg external volume",
        key_field: "volume_name",
        fields: VOLUME_FIELDS,
        steps: VOLUME_STEPS,
        shared_infrastructure: false,
    },
];

pub fn builtin() -> &'static [ResourceDescriptor] {
    &BUILTIN
}

pub fn find(skill_id: &str) -> Result<&'static ResourceDescriptor> {
    BUILTIN
        .iter()
        .find(|d| d.skill_id == skill_id)
        .ok_or_else(|| SnowUtilsError::UnknownSkill(skill_id.to_string()))
}

/// True for skills this build knows how to provision.
pub fn is_known(skill_id: &str) -> bool {
    BUILTIN.iter().any(|d| d.skill_id == skill_id)
}

// ---------------------------------------------------------------------------
// Template rendering
// ---------------------------------------------------------------------------

/// Values available to default templates besides the family's own fields.
#[derive(Debug, Clone, Default)]
pub struct NamingContext {
    pub prefix: Option<String>,
    pub project: String,
}

static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{([a-z0-9_]+)\}").unwrap())
}

impl ResourceDescriptor {
    pub fn step(&self, name: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn field_spec(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_secret_field(&self, name: &str) -> bool {
        self.field_spec(name).is_some_and(|f| f.secret)
    }

    pub fn renewable_steps(&self) -> impl Iterator<Item = &StepSpec> {
        self.steps.iter().filter(|s| s.renewable)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.required && !f.secret)
    }

    /// Resolve caller input plus defaults into the ordered field list.
    ///
    /// Defaults may reference `{prefix}`, `{project}`, `{uuid8}` or any field
    /// declared earlier. Caller-supplied keys the family does not declare are
    /// kept after the declared ones.
    pub fn resolve_fields(
        &self,
        input: &BTreeMap<String, String>,
        ctx: &NamingContext,
    ) -> Result<Vec<Field>> {
        let mut resolved: Vec<Field> = Vec::new();

        for spec in self.fields.iter().filter(|f| !f.secret) {
            let value = match input.get(spec.name).filter(|v| !v.trim().is_empty()) {
                Some(v) => spec.style.apply(v.trim()),
                None => match spec.default {
                    Some(template) => {
                        spec.style.apply(&self.render(template, &resolved, ctx)?)
                    }
                    None if spec.required => {
                        return Err(SnowUtilsError::MissingField {
                            skill: self.skill_id.to_string(),
                            field: spec.name.to_string(),
                        })
                    }
                    None => continue,
                },
            };
            resolved.push(Field::new(spec.name, value));
        }

        for (name, value) in input {
            if self.field_spec(name).is_none() {
                tracing::debug!(skill = self.skill_id, field = %name, "keeping undeclared field");
                resolved.push(Field::new(name.clone(), value.trim().to_string()));
            }
        }

        for f in &resolved {
            check_field(&f.name, &f.value)?;
        }
        Ok(resolved)
    }

    fn render(&self, template: &str, resolved: &[Field], ctx: &NamingContext) -> Result<String> {
        let mut missing: Option<String> = None;
        let out = placeholder_re().replace_all(template, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            let value = match name {
                "prefix" => ctx.prefix.clone(),
                "project" => Some(ctx.project.clone()),
                "uuid8" => Some(
                    uuid::Uuid::new_v4().simple().to_string()[..8].to_uppercase(),
                ),
                other => resolved
                    .iter()
                    .find(|f| f.name == other)
                    .map(|f| f.value.clone()),
            };
            value.unwrap_or_else(|| {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            })
        });
        if let Some(name) = missing {
            let field = if name == "prefix" {
                "identity prefix (set identity.prefix or SNOW_UTILS_IDENTITY)".to_string()
            } else {
                name
            };
            return Err(SnowUtilsError::MissingField {
                skill: self.skill_id.to_string(),
                field,
            });
        }
        Ok(out.into_owned())
    }

    /// A fresh IN_PROGRESS instance with every step PENDING.
    pub fn new_instance(&self, fields: Vec<Field>, admin_role: Option<String>) -> Result<ResourceInstance> {
        let key = fields
            .iter()
            .find(|f| f.name == self.key_field)
            .map(|f| f.value.clone())
            .ok_or_else(|| SnowUtilsError::MissingField {
                skill: self.skill_id.to_string(),
                field: self.key_field.to_string(),
            })?;
        crate::paths::validate_instance_key(&key)?;

        Ok(ResourceInstance {
            skill_id: self.skill_id.to_string(),
            instance_key: key,
            fields,
            steps: self
                .steps
                .iter()
                .map(|s| Step {
                    name: s.name.to_string(),
                    kind: s.kind.to_string(),
                    status: StepStatus::Pending,
                })
                .collect(),
            status: InstanceStatus::InProgress,
            created_at: Utc::now(),
            removed_at: None,
            admin_role,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> NamingContext {
        NamingContext {
            prefix: Some("ALICE".to_string()),
            project: "demo".to_string(),
        }
    }

    fn value<'a>(fields: &'a [Field], name: &str) -> &'a str {
        fields.iter().find(|f| f.name == name).unwrap().value.as_str()
    }

    #[test]
    fn registry_lookup() {
        assert_eq!(find("pat").unwrap().key_field, "user");
        assert!(matches!(find("nope"), Err(SnowUtilsError::UnknownSkill(_))));
        assert!(find("setup").unwrap().shared_infrastructure);
    }

    #[test]
    fn every_family_has_unique_step_names() {
        for d in builtin() {
            let mut names: Vec<_> = d.steps.iter().map(|s| s.name).collect();
            names.sort_unstable();
            names.dedup();
            assert_eq!(names.len(), d.steps.len(), "{}", d.skill_id);
            assert!(d.field_spec(d.key_field).is_some(), "{}", d.skill_id);
        }
    }

    #[test]
    fn pat_defaults_render_from_prefix_and_project() {
        let d = find("pat").unwrap();
        let mut input = BTreeMap::new();
        input.insert("allowed_cidrs".to_string(), "10.0.0.1/32".to_string());
        let fields = d.resolve_fields(&input, &ctx()).unwrap();
        assert_eq!(value(&fields, "user"), "ALICE_DEMO_RUNNER");
        assert_eq!(value(&fields, "pat_name"), "ALICE_DEMO_RUNNER_PAT");
        assert_eq!(value(&fields, "default_expiry_days"), "45");
        assert!(fields.iter().all(|f| f.name != "pat_token"));
    }

    #[test]
    fn caller_values_are_normalised() {
        let d = find("volumes").unwrap();
        let mut input = BTreeMap::new();
        input.insert("bucket".to_string(), "Iceberg_Demo".to_string());
        let fields = d.resolve_fields(&input, &ctx()).unwrap();
        assert_eq!(value(&fields, "bucket"), "iceberg-demo");
        assert_eq!(value(&fields, "bucket_name"), "alice-iceberg-demo");
        assert_eq!(value(&fields, "volume_name"), "ALICE_ICEBERG_DEMO_EXTERNAL_VOLUME");
        let ext = value(&fields, "external_id");
        assert!(ext.starts_with("ALICE_ICEBERG_DEMO_EXT_"));
        assert_eq!(ext.len(), "ALICE_ICEBERG_DEMO_EXT_".len() + 8);
    }

    #[test]
    fn missing_required_field() {
        let d = find("networks").unwrap();
        let err = d.resolve_fields(&BTreeMap::new(), &ctx()).unwrap_err();
        assert!(matches!(err, SnowUtilsError::MissingField { field, .. } if field == "values"));
    }

    #[test]
    fn missing_prefix_is_reported() {
        let d = find("setup").unwrap();
        let err = d
            .resolve_fields(&BTreeMap::new(), &NamingContext::default())
            .unwrap_err();
        assert!(err.to_string().contains("identity prefix"));
    }

    #[test]
    fn field_names_and_values_must_fit_the_manifest() {
        let d = find("networks").unwrap();
        for (name, value) in [
            ("Status", "COMPLETE"),
            ("status", "COMPLETE"),
            ("owner:team", "data"),
            ("**owner", "data"),
            ("values", "10.0.0.0/8\n<!-- END -- networks:X -->"),
            ("note", "a\rb"),
        ] {
            let mut input = BTreeMap::new();
            input.insert("values".to_string(), "10.0.0.0/8".to_string());
            input.insert(name.to_string(), value.to_string());
            let err = d.resolve_fields(&input, &ctx()).unwrap_err();
            assert!(matches!(err, SnowUtilsError::InvalidField { .. }), "{name}: {err}");
        }
    }

    #[test]
    fn new_instance_starts_pending() {
        let d = find("networks").unwrap();
        let mut input = BTreeMap::new();
        input.insert("values".to_string(), "10.0.0.0/8".to_string());
        let fields = d.resolve_fields(&input, &ctx()).unwrap();
        let inst = d.new_instance(fields, Some("ACCOUNTADMIN".to_string())).unwrap();
        assert_eq!(inst.instance_key, "ALICE_DEMO_NETWORK_RULE");
        assert_eq!(inst.status, InstanceStatus::InProgress);
        assert!(inst.steps.iter().all(|s| s.status == StepStatus::Pending));
        assert_eq!(inst.steps[0].kind, "NETWORK RULE");
    }
}
