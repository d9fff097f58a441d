use std::fmt::{Debug, Display};
use std::str::FromStr;

use crate::error::OrientationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Heading {
    North,
    East,
    South,
    West,
}

impl Heading {
    fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "N" => Some(Heading::North),
            "E" => Some(Heading::East),
            "S" => Some(Heading::South),
            "W" => Some(Heading::West),
            _ => None,
        }
    }

    fn symbol(&self) -> char {
        match self {
            Heading::North => 'N',
            Heading::East => 'E',
            Heading::South => 'S',
            Heading::West => 'W',
        }
    }
}

/// Side of the cell a link enters from and side it leaves through.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Orientation {
    from: Heading,
    to: Heading,
}

impl Orientation {
    pub fn new(from: Heading, to: Heading) -> Result<Self, OrientationError> {
        if from == to {
            return Err(OrientationError(
                format!("{}->{}", from.symbol(), to.symbol()).into(),
            ));
        }
        Ok(Self { from, to })
    }

    pub fn from(&self) -> Heading {
        self.from
    }

    pub fn to(&self) -> Heading {
        self.to
    }

    /// Orientation of the same channel walked in the opposite direction.
    pub fn reversed(&self) -> Self {
        Self {
            from: self.to,
            to: self.from,
        }
    }

    /// Walking direction in degrees, counter-clockwise from east.
    pub fn angle_degrees(&self) -> f64 {
        use Heading::*;
        match (self.from, self.to) {
            (North, East) => 315.0,
            (North, South) => 270.0,
            (North, West) => 225.0,
            (East, North) => 135.0,
            (East, West) => 180.0,
            (East, South) => 225.0,
            (South, East) => 45.0,
            (South, North) => 90.0,
            (South, West) => 135.0,
            (West, South) => 315.0,
            (West, East) => 0.0,
            (West, North) => 45.0,
            (North, North) | (East, East) | (South, South) | (West, West) => {
                unreachable!("orientations never start and end on the same side")
            }
        }
    }

    /// Intersection angle with another stream, in radians.
    pub fn intersection_angle(&self, other: &Orientation) -> f64 {
        ((self.angle_degrees() - other.angle_degrees()).abs() % 360.0).to_radians()
    }
}

impl FromStr for Orientation {
    type Err = OrientationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || OrientationError(s.into());
        let (from, to) = s.split_once("->").ok_or_else(invalid)?;
        let from = Heading::from_symbol(from.trim()).ok_or_else(invalid)?;
        let to = Heading::from_symbol(to.trim()).ok_or_else(invalid)?;
        Orientation::new(from, to).map_err(|_| invalid())
    }
}

impl Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}->{}", self.from.symbol(), self.to.symbol()))
    }
}

impl Debug for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::{Heading, Orientation};

    #[test]
    fn test_parse_and_display() {
        let o: Orientation = "W->E".parse().unwrap();
        assert_eq!(o.from(), Heading::West);
        assert_eq!(o.to(), Heading::East);
        assert_eq!(o.to_string(), "W->E");
        assert_eq!(o.reversed().to_string(), "E->W");
    }

    #[test]
    fn test_invalid_orientations() {
        assert!("N->N".parse::<Orientation>().is_err());
        assert!("N-E".parse::<Orientation>().is_err());
        assert!("X->E".parse::<Orientation>().is_err());
        assert!("".parse::<Orientation>().is_err());
    }

    #[test]
    fn test_angles() {
        let we: Orientation = "W->E".parse().unwrap();
        let ew: Orientation = "E->W".parse().unwrap();
        let sn: Orientation = "S->N".parse().unwrap();
        let ne: Orientation = "N->E".parse().unwrap();
        assert_relative_eq!(we.intersection_angle(&we), 0.0);
        assert_relative_eq!(we.intersection_angle(&ew), std::f64::consts::PI);
        assert_relative_eq!(sn.intersection_angle(&we), std::f64::consts::FRAC_PI_2);
        assert_relative_eq!(ne.intersection_angle(&we), 315f64.to_radians());
        assert_relative_eq!(we.intersection_angle(&ne), ne.intersection_angle(&we));
    }

    #[test]
    fn test_all_twelve_orientations_have_an_angle() {
        let headings = [Heading::North, Heading::East, Heading::South, Heading::West];
        let mut count = 0;
        for from in headings {
            for to in headings {
                if let Ok(o) = Orientation::new(from, to) {
                    assert!((0.0..360.0).contains(&o.angle_degrees()));
                    count += 1;
                }
            }
        }
        assert_eq!(count, 12);
    }
}
