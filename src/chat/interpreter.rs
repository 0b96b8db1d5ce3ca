//! Turns server events into transcript mutations
//!
//! Each decoded event applies at most one mutation to [`ChatState`] and yields
//! the notification describing it (`None` when the event changed nothing).
//! Streaming events only ever target the transcript's current message; with no
//! current message they are dropped.

use super::session::ChatState;
use super::transcript::{DeliveryState, Message, ToolInvocation, ToolStatus};
use super::types::{ServerEvent, ToolResultPayload, ToolUsePayload};
use crate::events::{ChatNotification, ErrorKind};
use tracing::{debug, warn};

/// Decode one text frame. Malformed frames are logged and yield `None`.
pub fn decode_frame(text: &str) -> Option<ServerEvent> {
    match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, frame_len = text.len(), "Dropping malformed chat frame");
            None
        }
    }
}

/// Decode and apply one text frame
pub fn handle_frame(state: &mut ChatState, text: &str) -> Option<ChatNotification> {
    let event = decode_frame(text)?;
    apply_event(state, event)
}

/// Apply one server event to the session state
pub fn apply_event(state: &mut ChatState, event: ServerEvent) -> Option<ChatNotification> {
    match event {
        ServerEvent::Init {
            session_id,
            conversation_id,
        } => {
            state.server_session_id = session_id.clone();
            state.conversation_id = conversation_id.clone();
            Some(ChatNotification::SessionInitialized {
                session_id,
                conversation_id,
            })
        }

        ServerEvent::ModelSwitch {
            to_model,
            to_model_name,
            ..
        } => {
            let display_name = to_model_name.unwrap_or_else(|| to_model.clone());
            let divider = Message::model_divider(to_model.clone(), display_name.clone());
            let message_id = state.transcript.append(divider);
            Some(ChatNotification::ModelSwitched {
                message_id,
                model: to_model,
                display_name,
            })
        }

        ServerEvent::StreamStart { model, model_name } => {
            // Keep the single-streaming invariant if the server never closed the last turn
            if let Some(stale) = state.transcript.finish_current() {
                debug!(message_id = %stale, "stream_start superseded an unfinished stream");
            }
            state.transcript.settle_pending(DeliveryState::Delivered);
            let message_id = state
                .transcript
                .start_current(Message::assistant_streaming(model, model_name.clone()));
            state.is_streaming = true;
            Some(ChatNotification::StreamStarted {
                message_id,
                model_name,
            })
        }

        ServerEvent::TextDelta { content } => {
            let message_id = state.transcript.current_id()?.to_string();
            if !state
                .transcript
                .update_current(|m| m.content.push_str(&content))
            {
                return None;
            }
            Some(ChatNotification::TextAppended {
                message_id,
                delta: content,
            })
        }

        ServerEvent::ToolUse { tool } => apply_tool_use(state, tool),

        ServerEvent::ToolResult { tool } => apply_tool_result(state, tool),

        ServerEvent::StreamEnd => {
            state.is_streaming = false;
            let message_id = state.transcript.finish_current()?;
            Some(ChatNotification::StreamFinished { message_id })
        }

        ServerEvent::Error { message } => {
            warn!(session_id = %state.session_id, error = %message, "Server reported chat error");
            state.is_streaming = false;
            state.transcript.finish_current();
            state.last_error = Some(message.clone());
            Some(ChatNotification::Error {
                kind: ErrorKind::Server,
                message,
            })
        }

        ServerEvent::Unknown => {
            debug!("Ignoring chat event with unknown type");
            None
        }
    }
}

fn apply_tool_use(state: &mut ChatState, tool: ToolUsePayload) -> Option<ChatNotification> {
    let message_id = state.transcript.current_id()?.to_string();
    let notification = ChatNotification::ToolStarted {
        message_id,
        tool_id: tool.id.clone(),
        name: tool.name.clone(),
    };
    let appended = state.transcript.update_current(|m| {
        m.tools
            .push(ToolInvocation::running(tool.id, tool.name, tool.input))
    });
    appended.then_some(notification)
}

fn apply_tool_result(state: &mut ChatState, tool: ToolResultPayload) -> Option<ChatNotification> {
    let message_id = state.transcript.current_id()?.to_string();
    let status = match tool.status.as_deref() {
        Some("error") => ToolStatus::Error,
        _ => ToolStatus::Completed,
    };
    let mut finished = false;
    state.transcript.update_current(|m| {
        if let Some(invocation) = m.tool_mut(&tool.id) {
            finished = invocation.finish(tool.output, status);
        }
    });
    if !finished {
        debug!(tool_id = %tool.id, "tool_result did not match a running tool");
        return None;
    }
    Some(ChatNotification::ToolFinished {
        message_id,
        tool_id: tool.id,
        status,
    })
}
