//! Installation of the notify-on-insert triggers.

use sqlx::PgPool;
use tracing::info;

use crate::config::ChannelBinding;
use crate::error::{Error, Result};

/// Longest identifier PostgreSQL stores without truncating.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Statements that (re)create the trigger for one binding, in order.
pub fn trigger_statements(binding: &ChannelBinding) -> Result<Vec<String>> {
    binding.validate()?;

    // Quoted, so channels differing only in case get distinct functions.
    let function = format!("notify_{}", binding.channel);
    let trigger = format!("{}_trigger", function);
    if trigger.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::Config(format!(
            "channel name too long for a trigger name: {:?}",
            binding.channel
        )));
    }
    let ChannelBinding {
        channel,
        table,
        key_column,
    } = binding;

    Ok(vec![
        format!(r#"DROP TRIGGER IF EXISTS "{trigger}" ON "{table}""#),
        format!(r#"DROP FUNCTION IF EXISTS "{function}"()"#),
        format!(
            r#"CREATE FUNCTION "{function}"() RETURNS trigger AS $BODY$ BEGIN PERFORM pg_notify('{channel}', CAST(NEW."{key_column}" AS text)); RETURN NEW; END; $BODY$ LANGUAGE plpgsql"#
        ),
        format!(
            r#"CREATE TRIGGER "{trigger}" AFTER INSERT ON "{table}" FOR EACH ROW EXECUTE PROCEDURE "{function}"()"#
        ),
    ])
}

/// Drop and recreate the trigger for every binding.
pub async fn install_triggers(pool: &PgPool, bindings: &[ChannelBinding]) -> Result<()> {
    for binding in bindings {
        let statements = trigger_statements(binding)?;
        let mut tx = pool.begin().await?;
        for statement in &statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        info!(
            channel = %binding.channel,
            table = %binding.table,
            key_column = %binding.key_column,
            "notification trigger installed"
        );
    }
    Ok(())
}
