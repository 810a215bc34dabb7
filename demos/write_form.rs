use formdata_codec::{FormData, Value};

fn main() {
    let form = FormData::new();

    form.append("foo", "bar");
    form.append("foofile", Value::file("Cargo.toml"));

    println!("Content-Type: {}", form.content_type());
    println!("Content-Length: {}", form.content_length());

    let out = std::env::temp_dir().join(format!("{}.multipart", form.boundary()));

    match form.write_to_path(&out) {
        Ok(written) => println!("Wrote {} bytes to {}", written, out.display()),
        Err(err) => eprintln!("Failed to write form: {}", err),
    }

    let body = std::fs::read(&out).expect("read back");
    let decoded = FormData::decode(body, &form.content_type()).expect("decode");

    for part in decoded.parts() {
        println!(
            "Field received:{} ({} bytes)",
            part.name().unwrap_or_default(),
            part.len()
        );
        if let Some(filename) = part.filename() {
            println!("Field filename:{}", filename);
        }
    }
}
