use bytes::Bytes;
use rs2_multipart::{
    body_channel, AppendOptions, FileObject, MultipartEncoder, MultipartResult, Value,
};

#[tokio::main]
async fn main() -> MultipartResult<()> {
    let mut form = MultipartEncoder::new();

    form.append("title", "Quarterly report", AppendOptions::default())?
        .append("tags", Value::list(vec!["finance", "q3"]), AppendOptions::default())?
        .append("draft", false, AppendOptions::default())?
        .append(
            "summary",
            Bytes::from_static(b"revenue up, costs down"),
            AppendOptions::new().filename("summary.txt").content_type("text/plain"),
        )?
        .append(
            "cover",
            FileObject::new("cover.png", vec![0x89u8, b'P', b'N', b'G']),
            AppendOptions::default(),
        )?;

    // Content produced by another task while the body is being read
    let (sender, live) = body_channel(4);
    form.append("log", live, AppendOptions::new().filename("build.log"))?;
    tokio::spawn(async move {
        for line in ["compiling\n", "linking\n", "done\n"] {
            if sender.send(line).await.is_err() {
                return;
            }
        }
        sender.finish().await;
    });

    let body = form.buffer().await?;
    for (name, value) in form.get_headers(false) {
        println!("{}: {}", name, value);
    }
    println!();
    println!("{}", String::from_utf8_lossy(&body));

    Ok(())
}
