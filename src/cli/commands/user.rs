use clap::Subcommand;
use serde_json::json;

use crate::cli::utils::*;
use crate::cli::{OutputFormat, Session};
use crate::database::models::{NewUser, Role, TenantId, UserId};

#[derive(Subcommand)]
pub enum UserCommands {
    #[command(about = "List users of a tenant")]
    List {
        #[arg(help = "Tenant ID")]
        tenant: TenantId,

        #[arg(long, help = "Include soft-deleted users")]
        all: bool,
    },

    #[command(about = "Create a user in a tenant")]
    Create {
        #[arg(help = "Home tenant ID")]
        tenant: TenantId,

        #[arg(help = "Display name")]
        name: String,

        #[arg(help = "Email address")]
        email: String,

        #[arg(long, default_value = "user", help = "user | admin | super_admin")]
        role: Role,
    },

    #[command(about = "Change a user's role")]
    Role {
        #[arg(help = "User ID")]
        user: UserId,

        #[arg(help = "user | admin | super_admin")]
        role: Role,
    },

    #[command(about = "Grant a user access to another tenant")]
    Grant {
        #[arg(help = "User ID")]
        user: UserId,

        #[arg(help = "Tenant ID")]
        tenant: TenantId,
    },

    #[command(about = "Revoke an explicit tenant grant")]
    Revoke {
        #[arg(help = "User ID")]
        user: UserId,

        #[arg(help = "Tenant ID")]
        tenant: TenantId,
    },
}

pub async fn handle(cmd: UserCommands, session: &Session, output_format: OutputFormat) -> anyhow::Result<()> {
    let users = session.guard.users();

    match cmd {
        UserCommands::List { tenant, all } => {
            let list = users.list_users(tenant, all).await?;
            if list.is_empty() {
                return output_empty_collection(&output_format, "users", "No users found");
            }

            match output_format {
                OutputFormat::Json => print_json(&json!({ "users": list })),
                OutputFormat::Text => {
                    println!("{:<6} {:<25} {:<30} {:<12} {}", "ID", "NAME", "EMAIL", "ROLE", "DELETED");
                    println!("{}", "-".repeat(90));
                    for u in &list {
                        println!(
                            "{:<6} {:<25} {:<30} {:<12} {}",
                            u.id,
                            u.name,
                            u.email,
                            u.role,
                            format_timestamp(u.deleted_at)
                        );
                    }
                    Ok(())
                }
            }
        }
        UserCommands::Create { tenant, name, email, role } => {
            let user = users
                .create_user(&session.ctx, NewUser { tenant_id: tenant, name, email, role })
                .await?;
            output_success(
                &output_format,
                &format!("User {} <{}> created with id {}", user.name, user.email, user.id),
                Some(json!({ "user": user })),
            )
        }
        UserCommands::Role { user, role } => {
            let updated = users.change_role(&session.ctx, user, role).await?;
            output_success(
                &output_format,
                &format!("User {} is now {}", updated.id, updated.role),
                Some(json!({ "user": updated })),
            )
        }
        UserCommands::Grant { user, tenant } => {
            let created = users.grant_access(&session.ctx, user, tenant).await?;
            let message = if created {
                format!("User {} granted access to tenant {}", user, tenant)
            } else {
                format!("User {} already had access to tenant {}", user, tenant)
            };
            output_success(&output_format, &message, Some(json!({ "created": created })))
        }
        UserCommands::Revoke { user, tenant } => {
            users.revoke_access(&session.ctx, user, tenant).await?;
            output_success(
                &output_format,
                &format!("Revoked explicit access of user {} to tenant {}", user, tenant),
                None,
            )
        }
    }
}
