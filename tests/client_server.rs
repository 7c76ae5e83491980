//! The SMTP client against a scripted mock relay.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpListener;

use gravesend::config::RemoteConfig;
use gravesend::smtp::{DispatchError, RemoteDispatcher, Stage};

async fn read_line(reader: &mut BufReader<OwnedReadHalf>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    line.trim_end().to_string()
}

fn config_for(port: u16) -> RemoteConfig {
    RemoteConfig {
        relay: Some("127.0.0.1".to_string()),
        port,
        ..RemoteConfig::default()
    }
}

#[tokio::test]
async fn full_dialogue_with_auth_delivers_the_body() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        writer.write_all(b"220 mock ESMTP\r\n").await.unwrap();

        let ehlo = read_line(&mut reader).await;
        assert!(ehlo.starts_with("EHLO "));
        writer
            .write_all(b"250-mock\r\n250-STARTTLS\r\n250 AUTH PLAIN LOGIN\r\n")
            .await
            .unwrap();

        assert_eq!(read_line(&mut reader).await, "AUTH LOGIN");
        writer.write_all(b"334 VXNlcm5hbWU6\r\n").await.unwrap();
        assert_eq!(read_line(&mut reader).await, STANDARD.encode("user"));
        writer.write_all(b"334 UGFzc3dvcmQ6\r\n").await.unwrap();
        assert_eq!(read_line(&mut reader).await, STANDARD.encode("secret"));
        writer.write_all(b"235 go ahead\r\n").await.unwrap();

        assert_eq!(
            read_line(&mut reader).await,
            "MAIL FROM:<alice@wonder.land>"
        );
        writer.write_all(b"250 ok\r\n").await.unwrap();

        assert_eq!(read_line(&mut reader).await, "RCPT TO:<bob@builder.example>");
        writer.write_all(b"250 ok\r\n").await.unwrap();
        assert_eq!(read_line(&mut reader).await, "RCPT TO:<carol@corner.example>");
        writer.write_all(b"250 ok\r\n").await.unwrap();

        assert_eq!(read_line(&mut reader).await, "DATA");
        writer.write_all(b"354 go\r\n").await.unwrap();

        let mut body = Vec::new();
        loop {
            let line = read_line(&mut reader).await;
            if line == "." {
                break;
            }
            body.push(line);
        }
        writer.write_all(b"250 queued\r\n").await.unwrap();

        assert_eq!(read_line(&mut reader).await, "QUIT");
        writer.write_all(b"221 Bye\r\n").await.unwrap();

        body
    });

    let mut config = config_for(port);
    config.login = Some("user".to_string());
    config.password = Some("secret".to_string());
    let dispatcher = RemoteDispatcher::from_config(&config).unwrap();

    dispatcher
        .deliver(
            b"alice@wonder.land",
            &[b"bob@builder.example".to_vec(), b"carol@corner.example".to_vec()],
            b"Subject: hi\r\n\r\n.leading dot\r\nplain line",
        )
        .await
        .unwrap();

    let body = server.await.unwrap();
    assert_eq!(
        body,
        vec!["Subject: hi", "", "..leading dot", "plain line"]
    );
}

#[tokio::test]
async fn auth_is_skipped_without_credentials() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        writer.write_all(b"220 mock ESMTP\r\n").await.unwrap();
        read_line(&mut reader).await; // EHLO
        writer
            .write_all(b"250-mock\r\n250 AUTH PLAIN LOGIN\r\n")
            .await
            .unwrap();

        // Straight to the envelope despite the advertised AUTH.
        assert_eq!(read_line(&mut reader).await, "MAIL FROM:<a@b>");
        writer.write_all(b"250 ok\r\n").await.unwrap();
        assert_eq!(read_line(&mut reader).await, "RCPT TO:<c@d>");
        writer.write_all(b"250 ok\r\n").await.unwrap();
        assert_eq!(read_line(&mut reader).await, "DATA");
        writer.write_all(b"354 go\r\n").await.unwrap();
        loop {
            if read_line(&mut reader).await == "." {
                break;
            }
        }
        writer.write_all(b"250 ok\r\n").await.unwrap();
        read_line(&mut reader).await; // QUIT
        writer.write_all(b"221 Bye\r\n").await.unwrap();
    });

    let dispatcher = RemoteDispatcher::from_config(&config_for(port)).unwrap();
    dispatcher
        .deliver(b"a@b", &[b"c@d".to_vec()], b"x")
        .await
        .unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn rejected_mail_from_fails_the_attempt_with_a_quit() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        writer.write_all(b"220 mock ESMTP\r\n").await.unwrap();
        read_line(&mut reader).await; // EHLO
        writer.write_all(b"250 mock\r\n").await.unwrap();

        read_line(&mut reader).await; // MAIL FROM
        writer.write_all(b"550 no thanks\r\n").await.unwrap();

        // The client still says goodbye.
        assert_eq!(read_line(&mut reader).await, "QUIT");
    });

    let dispatcher = RemoteDispatcher::from_config(&config_for(port)).unwrap();
    let err = dispatcher
        .deliver(b"a@b", &[b"c@d".to_vec()], b"x")
        .await
        .unwrap_err();

    match err {
        DispatchError::Rejected { stage, code, .. } => {
            assert_eq!(stage, Stage::MailFrom);
            assert_eq!(code, 550);
        }
        other => panic!("unexpected error: {other}"),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn malformed_reply_code_is_a_protocol_violation() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (_read_half, mut writer) = stream.into_split();
        writer.write_all(b"2x0 mock ESMTP\r\n").await.unwrap();
    });

    let dispatcher = RemoteDispatcher::from_config(&config_for(port)).unwrap();
    let err = dispatcher
        .deliver(b"a@b", &[b"c@d".to_vec()], b"x")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Reply {
            stage: Stage::Greeting,
            ..
        }
    ));
}

#[tokio::test]
async fn unexpected_continuation_in_greeting_is_rejected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (_read_half, mut writer) = stream.into_split();
        writer.write_all(b"220-mock\r\n220 ESMTP\r\n").await.unwrap();
    });

    let dispatcher = RemoteDispatcher::from_config(&config_for(port)).unwrap();
    let err = dispatcher
        .deliver(b"a@b", &[b"c@d".to_vec()], b"x")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Reply {
            stage: Stage::Greeting,
            ..
        }
    ));
}
