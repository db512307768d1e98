use anyhow::Result;
use serenity::{
    builder::{
        CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{info, warn};

use crate::{
    audio::{session::Enqueued, track::TrackCallbacks},
    bot::RitmoBot,
    error::PlayerError,
    sources::MediaDescriptor,
};

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &RitmoBot,
) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        respond(ctx, &command, "❌ Este comando solo funciona en un servidor").await?;
        return Ok(());
    };

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "play" => handle_play(ctx, command, bot, guild_id).await?,
        "pause" => handle_pause(ctx, command, bot, guild_id).await?,
        "resume" => handle_resume(ctx, command, bot, guild_id).await?,
        "skip" => handle_skip(ctx, command, bot, guild_id).await?,
        "queue" => handle_queue(ctx, command, bot, guild_id).await?,
        "leave" => handle_leave(ctx, command, bot, guild_id).await?,
        _ => {
            respond(ctx, &command, "❌ Comando no reconocido").await?;
        }
    }

    Ok(())
}

async fn handle_play(
    ctx: &Context,
    command: CommandInteraction,
    bot: &RitmoBot,
    guild_id: GuildId,
) -> Result<()> {
    let query = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "query")
        .and_then(|opt| opt.value.as_str())
        .ok_or_else(|| anyhow::anyhow!("query no proporcionado"))?
        .to_string();

    // Defer la respuesta: resolver la consulta puede tomar tiempo
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let voice_channel = get_user_voice_channel(ctx, guild_id, command.user.id);
    let session = match bot.sessions.get_or_create(guild_id, voice_channel).await {
        Ok(session) => session,
        Err(e) => {
            edit_reply(ctx, &command, &format!("⚠️ {e}")).await?;
            return Ok(());
        }
    };

    let make_callbacks = feedback_callbacks(ctx, command.channel_id);
    let reply = match session
        .enqueue_from_query(&query, command.user.id, make_callbacks)
        .await
    {
        Ok(Enqueued::Track(title)) => format!("🎵 En cola: **{title}**"),
        Ok(Enqueued::Playlist {
            title,
            added,
            failed,
        }) => {
            let mut reply = format!("🎵 Playlist **{title}** en cola: {added} canciones");
            if failed > 0 {
                reply.push_str(&format!(" ({failed} omitidas)"));
            }
            reply
        }
        Err(e) => format!("⚠️ {e}"),
    };
    edit_reply(ctx, &command, &reply).await?;

    Ok(())
}

async fn handle_pause(
    ctx: &Context,
    command: CommandInteraction,
    bot: &RitmoBot,
    guild_id: GuildId,
) -> Result<()> {
    match bot.sessions.get(guild_id) {
        Some(session) => {
            session.pause().await;
            respond(ctx, &command, "⏸️ Reproducción pausada").await
        }
        None => respond_not_playing(ctx, &command).await,
    }
}

async fn handle_resume(
    ctx: &Context,
    command: CommandInteraction,
    bot: &RitmoBot,
    guild_id: GuildId,
) -> Result<()> {
    match bot.sessions.get(guild_id) {
        Some(session) => {
            session.resume().await;
            respond(ctx, &command, "▶️ Reproducción reanudada").await
        }
        None => respond_not_playing(ctx, &command).await,
    }
}

async fn handle_skip(
    ctx: &Context,
    command: CommandInteraction,
    bot: &RitmoBot,
    guild_id: GuildId,
) -> Result<()> {
    match bot.sessions.get(guild_id) {
        Some(session) => {
            let reply = match session.skip().await {
                Some(title) => format!("⏭️ **{title}** saltada"),
                None => "⏭️ Nada que saltar, cola vacía".to_string(),
            };
            respond(ctx, &command, &reply).await
        }
        None => respond_not_playing(ctx, &command).await,
    }
}

async fn handle_queue(
    ctx: &Context,
    command: CommandInteraction,
    bot: &RitmoBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(session) = bot.sessions.get(guild_id) else {
        return respond_not_playing(ctx, &command).await;
    };

    let current = match session.now_playing().await {
        Some(title) => format!("▶️ Reproduciendo: **{title}**"),
        None => "📭 No hay nada reproduciéndose".to_string(),
    };

    // Hasta los próximos 5 tracks de la cola
    let upcoming = session.preview_queue(5).await;
    let reply = if upcoming.is_empty() {
        current
    } else {
        let listing = upcoming
            .iter()
            .enumerate()
            .map(|(i, title)| format!("{}) {}", i + 1, title))
            .collect::<Vec<_>>()
            .join("\n");
        format!("{current}\n\n{listing}")
    };

    respond(ctx, &command, &reply).await
}

async fn handle_leave(
    ctx: &Context,
    command: CommandInteraction,
    bot: &RitmoBot,
    guild_id: GuildId,
) -> Result<()> {
    match bot.sessions.get(guild_id) {
        Some(session) => {
            session.leave().await;
            bot.sessions.remove(guild_id);
            respond(ctx, &command, "👋 Desconectado del canal de voz").await
        }
        None => respond_not_playing(ctx, &command).await,
    }
}

// Funciones auxiliares

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

/// Callbacks que anuncian arranque y fallo del track en el canal de texto
/// donde se pidió. Son fire-and-forget: un error al enviar solo se registra.
fn feedback_callbacks(
    ctx: &Context,
    channel_id: ChannelId,
) -> impl Fn(&MediaDescriptor) -> TrackCallbacks {
    let http = ctx.http.clone();
    move |descriptor: &MediaDescriptor| {
        let title = descriptor.title.clone();

        let on_start = {
            let http = http.clone();
            let title = title.clone();
            Box::new(move || {
                let http = http.clone();
                let content = format!("▶️ Reproduciendo: **{title}**");
                tokio::spawn(async move {
                    if let Err(e) = channel_id.say(&http, content).await {
                        warn!("⚠️ No se pudo anunciar el track: {}", e);
                    }
                });
            }) as Box<dyn Fn() + Send + Sync>
        };

        let on_error = {
            let http = http.clone();
            let title = title.clone();
            Box::new(move |error: &PlayerError| {
                let http = http.clone();
                let content = format!("⚠️ Error al reproducir **{title}**: {error}");
                tokio::spawn(async move {
                    if let Err(e) = channel_id.say(&http, content).await {
                        warn!("⚠️ No se pudo reportar el error: {}", e);
                    }
                });
            }) as Box<dyn Fn(&PlayerError) + Send + Sync>
        };

        TrackCallbacks {
            on_start: Some(on_start),
            on_finish: None,
            on_error: Some(on_error),
        }
    }
}

async fn respond(ctx: &Context, command: &CommandInteraction, content: &str) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().content(content),
            ),
        )
        .await?;
    Ok(())
}

async fn respond_not_playing(ctx: &Context, command: &CommandInteraction) -> Result<()> {
    respond(ctx, command, &format!("⚠️ {}", PlayerError::NotPlaying)).await
}

async fn edit_reply(ctx: &Context, command: &CommandInteraction, content: &str) -> Result<()> {
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
        .await?;
    Ok(())
}
