use atmodem::at::{
    AtChannel, AtConfig, AtValue, Encoding, LinkState, Sim7080, SimulatedTransport,
};

#[tokio::test]
async fn test_full_session_send_and_receive() {
    let transport = SimulatedTransport::new();

    // Bring-up handshake.
    transport.inject_silence().await; // ends the auto-baud flush
    transport.inject_silence().await; // ends the escape flush
    transport.inject_line("OK").await; // ATE0
    transport.inject_line("OK").await; // +CSCS GSM
    transport.inject_line("OK").await; // AT ping

    let mut sim = Sim7080::new(transport.clone());
    sim.init().await.unwrap();

    // First poll walks the bring-up ladder to Ready.
    transport.inject_line("+CPIN: READY").await;
    transport.inject_line("OK").await;
    transport
        .inject_line("+CNUM: \"\",\"+15551234567\",145")
        .await;
    transport.inject_line("OK").await;
    transport.inject_line("OK").await; // +CMGF=1
    transport.inject_line("OK").await; // +CSCS UCS2
    transport.inject_line("OK").await; // +CMGL, nothing stored
    transport.inject_line("OK").await; // +CSCS GSM
    transport.inject_silence().await; // no event pending

    sim.poll(None).await.unwrap();
    assert_eq!(sim.state(), LinkState::Ready);
    assert_eq!(sim.subscriber(), Some("+15551234567"));

    // Outbound message.
    transport.inject_line("OK").await; // +CSCS UCS2
    transport.inject_line("OK").await; // +CSMP
    transport.inject_chunk(b"> ").await;
    transport.inject_line("+CMGS: 17").await;
    transport.inject_line("OK").await;
    transport.inject_line("OK").await; // +CSCS GSM

    let mr = sim
        .send_sms("15559876543", "蛤 UCS2 🤔", Encoding::Ucs2)
        .await
        .unwrap();
    assert_eq!(mr, 17);

    // A delivery notification arrives on the next poll and the stored
    // message is fetched and decoded.
    transport.inject_line("+CPIN: READY").await;
    transport.inject_line("OK").await;
    transport.inject_line("+CMTI: \"SM\",1").await;
    transport.inject_line("OK").await; // +CSCS UCS2
    transport
        .inject_line(concat!(
            "+CMGL: 1,\"REC UNREAD\",",
            "\"002B00310035003500350031003200330034003500360037\",,",
            "\"21/08/10,12:34:56+32\""
        ))
        .await;
    transport.inject_line("00480069").await;
    transport.inject_line("OK").await;
    transport.inject_line("OK").await; // +CSCS GSM

    sim.poll(None).await.unwrap();

    let msg = sim.next_message(None).await.unwrap().unwrap();
    assert_eq!(msg.index, 1);
    assert_eq!(msg.sender, "+15551234567");
    assert_eq!(msg.text, "Hi");
    assert_eq!(msg.timestamp, "21/08/10,12:34:56+32");

    // The session always ends back in the GSM character set.
    assert_eq!(sim.channel().encoding(), Encoding::Gsm);
}

#[tokio::test]
async fn test_signal_query_over_public_api() {
    let transport = SimulatedTransport::new();
    transport.inject_line("+CSQ: 18,0").await;
    transport.inject_line("OK").await;

    let mut chan = AtChannel::new(transport, AtConfig::default());
    chan.exec("+CSQ");
    let resp = chan.get_response(Some("+CSQ"), None).await.unwrap();
    assert!(resp.is_ok());
    assert_eq!(resp.field(0, 0).and_then(AtValue::as_int), Some(18));
    assert_eq!(resp.field(0, 1).and_then(AtValue::as_int), Some(0));
}
