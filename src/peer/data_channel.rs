use crate::peer::connection::PeerLink;
use std::sync::Arc;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

/// Подключение обработчиков к DataChannel
pub(crate) fn attach_dc(link: &Arc<PeerLink>, dc: &Arc<RTCDataChannel>) {
    let peer_id = link.id().to_owned();
    tracing::debug!(target: "agent_room::peer", peer_id, label = %dc.label(), "Attaching DataChannel");
    link.set_data_channel(dc.clone());

    let open_id = peer_id.clone();
    dc.on_open(Box::new(move || {
        tracing::info!(target: "agent_room::peer", peer_id = %open_id, "DataChannel is open and ready");
        Box::pin(async {})
    }));

    // Сообщения отдаются подписчику по одному, в порядке прихода
    let weak = Arc::downgrade(link);
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let weak = weak.clone();
        Box::pin(async move {
            let Some(link) = weak.upgrade() else {
                return;
            };
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => link.deliver_message(text).await,
                Err(e) => {
                    tracing::warn!(target: "agent_room::peer", peer_id = %link.id(), error = %e, "Non-UTF-8 DataChannel message dropped");
                }
            }
        })
    }));

    dc.on_close(Box::new(move || {
        tracing::info!(target: "agent_room::peer", peer_id = %peer_id, "DataChannel closed");
        Box::pin(async {})
    }));

    dc.on_error(Box::new(move |e: webrtc::Error| {
        tracing::warn!(target: "agent_room::peer", error = %e, "DataChannel error");
        Box::pin(async {})
    }));
}
