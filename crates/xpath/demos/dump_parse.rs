use arbor_xpath::parser::{Language, parse};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let (language, src) = match args.as_slice() {
        [_, src] => (Language::XPath31, src),
        [_, flag, src] if flag == "--xquery" => (Language::XQueryUpdate31, src),
        _ => {
            eprintln!("Usage: dump_parse [--xquery] <query>");
            std::process::exit(2);
        }
    };
    match parse(src, language) {
        Ok(module) => println!("{module:#?}"),
        Err(e) => {
            eprintln!("Parse error: {e}");
            std::process::exit(1);
        }
    }
}
