//! WebSocket 连接主循环
//!
//! 每个连接一个任务，单个 select 循环处理：强制关闭信号、空闲超时、
//! 会话入站队列、客户端帧。循环结束后关闭会话并清理注册表。

use std::time::Duration;

use application::{ConnectionSession, ServerFrame, SessionEvent};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tokio::time::{sleep_until, Instant};

type WsSender = SplitSink<WebSocket, WsMessage>;

async fn send_frame(sender: &mut WsSender, frame: &ServerFrame) -> bool {
    let payload = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(err) => {
            tracing::warn!(error = %err, "failed to serialize websocket payload");
            return true;
        }
    };
    sender.send(WsMessage::Text(payload.into())).await.is_ok()
}

pub async fn run(socket: WebSocket, mut session: ConnectionSession, idle_timeout: Duration) {
    let (mut sender, mut incoming) = socket.split();
    let session_id = session.id();
    let shutdown = session.shutdown_token();

    let Some(mut events) = session.take_events() else {
        session.close().await;
        return;
    };

    match session.activate().await {
        Ok(sync) => {
            if !send_frame(&mut sender, &ServerFrame::from(sync)).await {
                session.close().await;
                return;
            }
        }
        Err(err) => {
            tracing::warn!(session_id = %session_id, error = %err, "会话激活失败");
            send_frame(&mut sender, &ServerFrame::error(&err, None)).await;
            session.close().await;
            return;
        }
    }

    let mut deadline = Instant::now() + idle_timeout;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                tracing::info!(session_id = %session_id, "会话被强制关闭");
                break;
            }
            _ = sleep_until(deadline) => {
                tracing::info!(session_id = %session_id, "连接空闲超时");
                break;
            }
            event = events.recv() => {
                let frame = match event {
                    Some(SessionEvent::Message(event)) => ServerFrame::Message((*event).clone()),
                    Some(SessionEvent::RoomAvailable(room_id)) => {
                        match session.join_room(room_id).await {
                            Ok(history) => ServerFrame::RoomJoined(history),
                            Err(err) => ServerFrame::error(&err, Some(room_id)),
                        }
                    }
                    None => break,
                };
                if !send_frame(&mut sender, &frame).await {
                    tracing::debug!(session_id = %session_id, "发送失败，连接已断开");
                    break;
                }
            }
            message = incoming.next() => {
                match message {
                    Some(Ok(WsMessage::Text(text))) => {
                        deadline = Instant::now() + idle_timeout;
                        if let Some(reply) = session.handle_text(text.as_str()).await {
                            if !send_frame(&mut sender, &reply).await {
                                break;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        deadline = Instant::now() + idle_timeout;
                        if sender.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Pong(_))) | Some(Ok(WsMessage::Binary(_))) => {
                        deadline = Instant::now() + idle_timeout;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        tracing::info!(session_id = %session_id, "客户端关闭连接");
                        break;
                    }
                    Some(Err(err)) => {
                        tracing::warn!(session_id = %session_id, error = %err, "WebSocket 传输错误");
                        break;
                    }
                }
            }
        }
    }

    session.close().await;
    if let Err(err) = sender.close().await {
        tracing::debug!(session_id = %session_id, error = %err, "关闭 WebSocket 失败");
    }
}
