use crate::config::Config;
use crate::db::Store;
use crate::services::CreateInvitationRequest;
use crate::state::SharedState;

pub struct InviteArgs {
    pub libraries: Vec<String>,
    pub screens: i32,
    pub downloads: bool,
    pub trial: i32,
    pub overseerr: bool,
    pub uses: i32,
    pub expires: Option<i64>,
    pub code: Option<String>,
}

impl From<InviteArgs> for CreateInvitationRequest {
    fn from(args: InviteArgs) -> Self {
        Self {
            libraries: args.libraries,
            screens: args.screens,
            allow_downloads: args.downloads,
            expires_in_minutes: args.expires,
            trial_duration_minutes: args.trial,
            overseerr_access: args.overseerr,
            max_uses: args.uses,
            custom_code: args.code,
        }
    }
}

pub async fn cmd_create_invite(config: Config, args: InviteArgs) -> anyhow::Result<()> {
    let shared = SharedState::new(config).await?;
    let created = shared
        .invite_service
        .create_invitation(args.into())
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    println!("Invitation created: {}", created.code);
    println!("  {}", created.invite_url);
    Ok(())
}

pub async fn cmd_list_invites(config: &Config) -> anyhow::Result<()> {
    let store = Store::new(&config.general.database_path).await?;
    let invitations = store.get_all_pending_invitations().await?;

    if invitations.is_empty() {
        println!("No pending invitations.");
        println!();
        println!("Create one with: plexpanel invite --libraries \"Filmes,Séries\"");
        return Ok(());
    }

    println!("Pending Invitations ({} total)", invitations.len());
    println!("{:-<70}", "");

    for inv in invitations {
        let screens = if inv.screen_limit == 0 {
            "unlimited".to_string()
        } else {
            inv.screen_limit.to_string()
        };
        println!(
            "• {} [{}/{} uses]",
            inv.code, inv.use_count, inv.max_uses
        );
        println!(
            "  Libraries: {} | Screens: {} | Trial: {} min",
            inv.library_titles().join(", "),
            screens,
            inv.trial_duration_minutes
        );
        if let Some(expires_at) = &inv.expires_at {
            println!("  Expires: {expires_at}");
        }
    }

    Ok(())
}
