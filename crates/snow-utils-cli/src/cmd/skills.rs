use crate::output::{print_json, print_table};
use serde::Serialize;
use snow_utils_core::descriptor;

#[derive(Serialize)]
struct Skill {
    skill_id: &'static str,
    title: &'static str,
    key_field: &'static str,
    required: Vec<&'static str>,
    steps: Vec<&'static str>,
    shared_infrastructure: bool,
}

pub fn run(json: bool) -> anyhow::Result<()> {
    let skills: Vec<Skill> = descriptor::builtin()
        .iter()
        .map(|d| Skill {
            skill_id: d.skill_id,
            title: d.title,
            key_field: d.key_field,
            required: d.required_fields().map(|f| f.name).collect(),
            steps: d.steps.iter().map(|s| s.name).collect(),
            shared_infrastructure: d.shared_infrastructure,
        })
        .collect();

    if json {
        return print_json(&skills);
    }
    let rows = skills
        .iter()
        .map(|s| {
            vec![
                s.skill_id.to_string(),
                s.title.to_string(),
                if s.required.is_empty() {
                    "-".to_string()
                } else {
                    s.required.join(", ")
                },
                s.steps.join(" > "),
            ]
        })
        .collect();
    print_table(&["SKILL", "TITLE", "REQUIRED", "STEPS"], rows);
    Ok(())
}
