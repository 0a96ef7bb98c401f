//! Quantities in follow-up questions: "10000", "10,000", "10k", "2.5 lakh"

use nom::{
    branch::alt,
    bytes::complete::tag_no_case,
    character::complete::{char, digit1, space0},
    combinator::{opt, recognize},
    multi::many0,
    sequence::{pair, preceded, tuple},
    IResult,
};

fn digits(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        digit1,
        many0(pair(char(','), digit1)),
        opt(pair(char('.'), digit1)),
    )))(input)
}

fn multiplier(input: &str) -> IResult<&str, f64> {
    let (rest, word) = preceded(
        space0,
        alt((
            tag_no_case("thousand"),
            tag_no_case("million"),
            tag_no_case("lakhs"),
            tag_no_case("lakh"),
            tag_no_case("crores"),
            tag_no_case("crore"),
            tag_no_case("k"),
            tag_no_case("m"),
        )),
    )(input)?;
    // a bare letter must end the word: "10 km" is not ten thousand
    if word.len() == 1 && rest.chars().next().map_or(false, char::is_alphanumeric) {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        )));
    }
    let factor = match word.to_lowercase().as_str() {
        "k" | "thousand" => 1_000.0,
        "m" | "million" => 1_000_000.0,
        "lakh" | "lakhs" => 100_000.0,
        _ => 10_000_000.0,
    };
    Ok((rest, factor))
}

/// Parse a quantity at the start of `input`
pub fn quantity(input: &str) -> IResult<&str, f64> {
    let (rest, raw) = digits(input)?;
    let (rest, factor) = opt(multiplier)(rest)?;
    let value: f64 = raw.replace(',', "").parse().map_err(|_| {
        nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit))
    })?;
    Ok((rest, value * factor.unwrap_or(1.0)))
}

/// First quantity anywhere in `text`
pub fn find_quantity(text: &str) -> Option<f64> {
    text.char_indices()
        .filter(|(i, c)| {
            c.is_ascii_digit()
                && !text[..*i]
                    .chars()
                    .next_back()
                    .map_or(false, |p| p.is_ascii_alphanumeric())
        })
        .find_map(|(i, _)| quantity(&text[i..]).ok().map(|(_, v)| v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_and_grouped() {
        assert_eq!(find_quantity("under 10000?"), Some(10_000.0));
        assert_eq!(find_quantity("over 10,000 km"), Some(10_000.0));
        assert_eq!(find_quantity("more than 12.5"), Some(12.5));
    }

    #[test]
    fn test_multipliers() {
        assert_eq!(find_quantity("under 10k"), Some(10_000.0));
        assert_eq!(find_quantity("above 2 lakh"), Some(200_000.0));
        assert_eq!(find_quantity("above 1 crore"), Some(10_000_000.0));
        assert_eq!(find_quantity("less than 10 km"), Some(10.0));
    }

    #[test]
    fn test_skips_digits_inside_words() {
        assert_eq!(find_quantity("vehicle MH12 under 500"), Some(500.0));
        assert_eq!(find_quantity("no numbers"), None);
    }
}
