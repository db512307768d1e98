//! # Bot Module
//!
//! Discord-facing surface of the bot: command registration and interaction
//! dispatch. All real playback logic lives in [`crate::audio`]; this layer
//! only translates interactions into session calls and renders the results
//! (titles, queue previews, error strings) back to the user.

use serenity::{
    all::{Context, EventHandler, Interaction, Ready},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info};

pub mod commands;
pub mod handlers;

use crate::{
    audio::{SessionRegistry, SongbirdConnector},
    config::Config,
    sources::YtDlpResolver,
};

/// Registro de sesiones con los proveedores de producción.
pub type Sessions = SessionRegistry<SongbirdConnector, YtDlpResolver>;

/// Handler principal del bot.
pub struct RitmoBot {
    config: Config,
    pub sessions: Arc<Sessions>,
}

impl RitmoBot {
    pub fn new(config: Config, sessions: Arc<Sessions>) -> Self {
        Self { config, sessions }
    }

    async fn register_commands(&self, ctx: &Context) -> anyhow::Result<()> {
        if let Some(guild_id) = self.config.guild_id {
            // En desarrollo los comandos de guild se propagan al instante
            commands::register_guild_commands(ctx, guild_id.into()).await?;
            info!("📋 Comandos registrados en guild de desarrollo {}", guild_id);
        } else {
            commands::register_global_commands(ctx).await?;
            info!("📋 Comandos globales registrados");
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for RitmoBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            let name = command.data.name.clone();
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("Error al manejar el comando /{}: {:?}", name, e);
            }
        }
    }
}
