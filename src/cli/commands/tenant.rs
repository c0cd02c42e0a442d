use clap::Subcommand;
use serde_json::json;

use crate::cli::utils::*;
use crate::cli::{OutputFormat, Session};
use crate::database::models::{NewTenant, Tenant, TenantId, TenantStatus};

#[derive(Subcommand)]
pub enum TenantCommands {
    #[command(about = "List tenants")]
    List {
        #[arg(long, help = "Include soft-deleted tenants")]
        all: bool,
    },

    #[command(about = "Show tenant information")]
    Show {
        #[arg(help = "Tenant ID")]
        id: TenantId,
    },

    #[command(about = "Create new tenant")]
    Create {
        #[arg(help = "Tenant name")]
        name: String,

        #[arg(long, help = "VAT number (partita IVA)")]
        vat: Option<String>,

        #[arg(long, help = "Tax code (codice fiscale)")]
        tax_code: Option<String>,
    },

    #[command(about = "Deactivate a tenant and soft-delete everything it owns")]
    Deactivate {
        #[arg(help = "Tenant ID")]
        id: TenantId,
    },

    #[command(about = "Restore a deactivated tenant (its rows stay deleted)")]
    Restore {
        #[arg(help = "Tenant ID")]
        id: TenantId,
    },

    #[command(about = "Set a live tenant active or inactive")]
    Status {
        #[arg(help = "Tenant ID")]
        id: TenantId,

        #[arg(help = "active | inactive")]
        status: String,
    },
}

pub async fn handle(cmd: TenantCommands, session: &Session, output_format: OutputFormat) -> anyhow::Result<()> {
    let tenants = session.guard.tenants();

    match cmd {
        TenantCommands::List { all } => {
            let list = tenants.list_tenants(all).await?;
            if list.is_empty() {
                return output_empty_collection(&output_format, "tenants", "No tenants found");
            }

            match output_format {
                OutputFormat::Json => print_json(&json!({ "tenants": list })),
                OutputFormat::Text => {
                    println!("{:<6} {:<30} {:<10} {:<18} {}", "ID", "NAME", "STATUS", "CREATED", "DELETED");
                    println!("{}", "-".repeat(84));
                    for t in &list {
                        println!(
                            "{:<6} {:<30} {:<10} {:<18} {}",
                            t.id,
                            t.name,
                            t.status.as_str(),
                            format_timestamp(Some(t.created_at)),
                            format_timestamp(t.deleted_at)
                        );
                    }
                    Ok(())
                }
            }
        }
        TenantCommands::Show { id } => {
            let tenant = tenants
                .get_tenant_any(id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Tenant {} not found", id))?;
            print_tenant(&output_format, &tenant)
        }
        TenantCommands::Create { name, vat, tax_code } => {
            let tenant = tenants
                .create_tenant(&session.ctx, NewTenant { name, vat_number: vat, tax_code })
                .await?;
            output_success(
                &output_format,
                &format!("Tenant '{}' created with id {}", tenant.name, tenant.id),
                Some(json!({ "tenant": tenant })),
            )
        }
        TenantCommands::Deactivate { id } => {
            let report = session.guard.deactivate_tenant(&session.ctx, id).await?;
            output_success(
                &output_format,
                &format!(
                    "Tenant {} deactivated: {} users, {} files, {} projects soft-deleted",
                    id, report.users_affected, report.files_affected, report.projects_affected
                ),
                Some(json!({ "report": report })),
            )
        }
        TenantCommands::Restore { id } => {
            let tenant = session.guard.restore_tenant(&session.ctx, id).await?;
            output_success(
                &output_format,
                &format!("Tenant {} '{}' restored; its users, files and projects remain deleted", tenant.id, tenant.name),
                Some(json!({ "tenant": tenant })),
            )
        }
        TenantCommands::Status { id, status } => {
            let status = TenantStatus::try_from(status)?;
            let tenant = tenants.set_status(&session.ctx, id, status).await?;
            output_success(
                &output_format,
                &format!("Tenant {} is now {}", tenant.id, tenant.status.as_str()),
                Some(json!({ "tenant": tenant })),
            )
        }
    }
}

fn print_tenant(output_format: &OutputFormat, tenant: &Tenant) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => print_json(&json!({ "tenant": tenant })),
        OutputFormat::Text => {
            println!("ID:         {}", tenant.id);
            println!("Name:       {}", tenant.name);
            println!("Status:     {}", tenant.status.as_str());
            println!("VAT number: {}", tenant.vat_number.as_deref().unwrap_or("-"));
            println!("Tax code:   {}", tenant.tax_code.as_deref().unwrap_or("-"));
            println!("Created:    {}", format_timestamp(Some(tenant.created_at)));
            println!("Deleted:    {}", format_timestamp(tenant.deleted_at));
            Ok(())
        }
    }
}
