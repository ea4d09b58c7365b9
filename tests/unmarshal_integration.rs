use std::io::Read;

use flatxml::{
    core::extractor::VariableLayout,
    marshal::{Marshaler, MarshalerBuilder, MarshalerConfig},
};

fn round_trip(marshaler: &Marshaler, flat: &[u8]) -> (u64, Vec<u8>) {
    let mut xml = Vec::new();
    marshaler
        .wrap(flat, "in.txt")
        .unwrap()
        .read_to_end(&mut xml)
        .unwrap();

    let mut regenerated = Vec::new();
    let lines = marshaler
        .unmarshal(xml.as_slice(), &mut regenerated)
        .unwrap();
    (lines, regenerated)
}

#[test]
fn fixed_width_file_survives_a_round_trip() {
    let flat = "ID NAME  \nAB123hello\nC&<45 <b>x\n";
    let marshaler = MarshalerBuilder::new()
        .fixed_width(&[2, 3, 5])
        .column_names(&["First", "Second", "Third"])
        .header_line_count(1)
        .build()
        .unwrap();

    let (lines, regenerated) = round_trip(&marshaler, flat.as_bytes());

    assert_eq!(lines, 3);
    assert_eq!(String::from_utf8(regenerated).unwrap(), flat);
}

#[test]
fn short_fixed_width_lines_are_padded_back() {
    let marshaler = MarshalerBuilder::new()
        .fixed_width(&[2, 3, 5])
        .build()
        .unwrap();

    let (_, regenerated) = round_trip(&marshaler, b"AB123he\nCD4");

    // the unfinished columns were never emitted
    assert_eq!(String::from_utf8(regenerated).unwrap(), "AB123\nCD\n");
}

#[test]
fn delimited_file_with_attributes_survives_a_round_trip() {
    let flat = "qty|item|note\n003|pen|\"blue\"\n010|ink|\n";
    let marshaler = MarshalerBuilder::new()
        .delimited("|")
        .header_line_count(1)
        .names_from_header_line(1)
        .columns_as_attributes(true)
        .build()
        .unwrap();

    let (lines, regenerated) = round_trip(&marshaler, flat.as_bytes());

    assert_eq!(lines, 3);
    assert_eq!(String::from_utf8(regenerated).unwrap(), flat);
}

#[test]
fn variable_layout_survives_a_round_trip() {
    let layout = VariableLayout::new(1, vec![3, 1])
        .suffix("A", vec![2, 4])
        .suffix("B", vec![5, -1, 1]);
    let marshaler = MarshalerBuilder::new()
        .variable_layout(layout)
        .build()
        .unwrap();

    let flat = "001A12abcd\n002BhelloZ\n";
    let (lines, regenerated) = round_trip(&marshaler, flat.as_bytes());

    assert_eq!(lines, 2);
    assert_eq!(String::from_utf8(regenerated).unwrap(), flat);
}

#[test]
fn verbatim_lines_survive_a_round_trip() {
    let marshaler = MarshalerBuilder::new()
        .line_terminator(";")
        .header_line_count(1)
        .build()
        .unwrap();

    let flat = "title;a < b;;last;";
    let (lines, regenerated) = round_trip(&marshaler, flat.as_bytes());

    assert_eq!(lines, 4);
    assert_eq!(String::from_utf8(regenerated).unwrap(), flat);
}

#[test]
fn latin1_file_is_regenerated_in_latin1() {
    let marshaler = MarshalerBuilder::new()
        .delimited(";")
        .encoding("iso-8859-1")
        .build()
        .unwrap();

    let flat = b"caf\xe9;cr\xe8me\n";
    let (lines, regenerated) = round_trip(&marshaler, flat);

    assert_eq!(lines, 1);
    assert_eq!(regenerated, flat);
}

#[cfg(feature = "date")]
#[test]
fn date_columns_are_converted_back_to_the_flat_pattern() {
    let config = MarshalerConfig::from_json_str(
        r#"{
            "layout": "delimited",
            "separator": ",",
            "converters": [
                null,
                {"type": "date", "inputPattern": "%Y%m%d%H%M", "outputPattern": "%d/%m/%Y %H:%M"}
            ]
        }"#,
    )
    .unwrap();
    let marshaler = Marshaler::new(config).unwrap();

    let mut xml = String::new();
    marshaler
        .wrap("A,202402291530\nB,pending".as_bytes(), "dates.csv")
        .unwrap()
        .read_to_string(&mut xml)
        .unwrap();
    assert!(xml.contains("<Col number=\"2\">29/02/2024 15:30</Col>"));

    let mut flat = Vec::new();
    marshaler.unmarshal(xml.as_bytes(), &mut flat).unwrap();

    assert_eq!(
        String::from_utf8(flat).unwrap(),
        "A,202402291530\nB,pending\n"
    );
}

#[test]
fn number_columns_lose_their_padding() {
    let config = MarshalerConfig::from_json_str(
        r#"{"layout": "fixed", "columnWidths": [4, 2], "converters": [{"type": "number"}]}"#,
    )
    .unwrap();
    let marshaler = Marshaler::new(config).unwrap();

    let (_, regenerated) = round_trip(&marshaler, b"0042ab\n0000cd\n");

    assert_eq!(String::from_utf8(regenerated).unwrap(), "42  ab\n    cd\n");
}
