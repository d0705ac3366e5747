use serde::Serialize;
use snow_utils_core::manifest::ResourceInstance;
use snow_utils_core::mask;
use snow_utils_core::provider::PlannedAction;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let line = |cells: Vec<String>| {
        cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let w = widths.get(i).copied().unwrap_or(0);
                format!("{cell:w$}")
            })
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    println!("{}", line(headers.iter().map(|h| h.to_string()).collect()));
    println!(
        "{}",
        widths.iter().map(|&w| "-".repeat(w)).collect::<Vec<_>>().join("  ")
    );
    for row in rows {
        println!("{}", line(row));
    }
}

/// Field value as shown to a human. JSON output never goes through here.
pub fn shown(name: &str, value: &str, masked: bool) -> String {
    if masked {
        mask::mask_field(name, value)
    } else {
        value.to_string()
    }
}

pub fn print_plan(plan: &[PlannedAction]) {
    if plan.is_empty() {
        println!("Nothing to do.");
        return;
    }
    let rows = plan
        .iter()
        .enumerate()
        .map(|(i, a)| {
            vec![
                (i + 1).to_string(),
                a.action.to_string(),
                a.step_name.clone(),
                a.kind.clone(),
                format!("{}:{}", a.skill_id, a.instance_key),
            ]
        })
        .collect();
    print_table(&["#", "ACTION", "STEP", "KIND", "INSTANCE"], rows);
}

pub fn print_instance(inst: &ResourceInstance, masked: bool) {
    println!("{}  [{}]", inst.id(), inst.status);
    println!("  created: {}", inst.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(removed) = inst.removed_at {
        println!("  removed: {}", removed.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(role) = &inst.admin_role {
        println!("  admin role: {role}");
    }
    println!();
    let rows = inst
        .fields
        .iter()
        .map(|f| vec![f.name.clone(), shown(&f.name, &f.value, masked)])
        .collect();
    print_table(&["FIELD", "VALUE"], rows);
    println!();
    let rows = inst
        .steps
        .iter()
        .map(|s| vec![s.name.clone(), s.kind.clone(), s.status.to_string()])
        .collect();
    print_table(&["STEP", "KIND", "STATUS"], rows);
}
