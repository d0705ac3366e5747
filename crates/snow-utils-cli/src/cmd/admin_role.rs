use crate::output::print_json;
use clap::Subcommand;
use snow_utils_core::{descriptor, store::ManifestStore};
use std::path::Path;

#[derive(Subcommand)]
pub enum AdminRoleSubcommand {
    /// Show the admin role recorded for a resource family
    Get { skill: String },

    /// Record the admin role for a resource family
    Set {
        skill: String,
        role: String,
        /// Replace a different role that is already recorded
        #[arg(long = "override")]
        override_existing: bool,
    },
}

pub fn run(root: &Path, subcmd: AdminRoleSubcommand, json: bool) -> anyhow::Result<()> {
    let store = ManifestStore::new(root);
    match subcmd {
        AdminRoleSubcommand::Get { skill } => {
            let role = store.get_admin_role(&skill)?;
            if json {
                return print_json(&serde_json::json!({ "skill": skill, "admin_role": role }));
            }
            match role {
                Some(role) => println!("{skill}: {role}"),
                None => println!("{skill}: no admin role recorded"),
            }
            Ok(())
        }
        AdminRoleSubcommand::Set {
            skill,
            role,
            override_existing,
        } => {
            descriptor::find(&skill)?;
            store.set_admin_role(&skill, &role, override_existing)?;
            let role = store.get_admin_role(&skill)?;
            if json {
                return print_json(&serde_json::json!({ "skill": skill, "admin_role": role }));
            }
            println!("{skill}: {}", role.unwrap_or_default());
            Ok(())
        }
    }
}
