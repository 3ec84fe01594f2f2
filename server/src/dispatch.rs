//! Turns inbound text frames into hub events.

use crate::error::DispatchError;
use crate::hub::HubHandle;
use crate::world::MoveInput;
use log::debug;
use shared::ClientMessage;

/// Decodes one frame from `session_id` and submits it to the hub.
///
/// Any player or owner id carried in the message body is ignored; events are
/// always attributed to the session the frame arrived on. Unknown message
/// types are dropped but still count as activity.
pub fn dispatch(hub: &HubHandle, session_id: &str, text: &str) -> Result<(), DispatchError> {
    match ClientMessage::from_json(text)? {
        ClientMessage::PlayerInput(input) => {
            let movement = MoveInput {
                move_x: input.move_x,
                move_y: input.move_y,
                facing_left: input.facing_left,
            };
            hub.submit_input(session_id, movement)?;
        }
        ClientMessage::Shoot(shot) => {
            hub.submit_projectile(session_id, shot.into())?;
        }
        ClientMessage::Unknown => {
            debug!("Ignoring unrecognised message from {}", session_id);
            hub.touch(session_id)?;
        }
    }
    Ok(())
}
